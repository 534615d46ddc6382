use criterion::{black_box, criterion_group, criterion_main, Criterion};

use coletores::pipeline::Normalizer;
use coletores::similarity::{combined_score, edit_score, jaro_winkler_score, phonetic_match};
use coletores::{CanonicalEntity, CanonicalStore, EntityType, SimilarityWeights};

const SYLLABLES: [&str; 12] = [
    "sil", "san", "for", "gui", "mar", "cos", "pe", "rei", "al", "bra", "mo", "ta",
];

/// Deterministic synthetic surnames with realistic length and variety.
fn surname(index: usize) -> String {
    let a = SYLLABLES[index % SYLLABLES.len()];
    let b = SYLLABLES[(index / SYLLABLES.len()) % SYLLABLES.len()];
    let c = SYLLABLES[(index / 7) % SYLLABLES.len()];
    let mut name = format!("{a}{b}{c}");
    name[..1].make_ascii_uppercase();
    name
}

fn seeded_store(entities: usize) -> CanonicalStore {
    let mut store = CanonicalStore::open_in_memory(SimilarityWeights::default(), 0.70).unwrap();
    let now = chrono::Utc::now().naive_utc();
    for index in 0..entities {
        let canonical = format!("{}, A.B.", surname(index));
        let candidate = CanonicalEntity {
            id: None,
            canonical_name: canonical.clone(),
            entity_type: EntityType::Pessoa,
            classification_confidence: 0.85,
            grouping_confidence: 1.0,
            variations: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        store.upsert(&candidate, &canonical, 1.0).unwrap();
    }
    store
}

// A grouping decision must stay well under ~1 ms per candidate pair on
// name-length keys; these keep the three subscores and the combination
// honest.
fn bench_kernel(c: &mut Criterion) {
    let weights = SimilarityWeights::default();
    let left = "FORZZA, R. C.";
    let right = "FORZZA, RAFAELA C.";

    c.bench_function("kernel/edit_score", |b| {
        b.iter(|| edit_score(black_box(left), black_box(right)))
    });
    c.bench_function("kernel/jaro_winkler_score", |b| {
        b.iter(|| jaro_winkler_score(black_box(left), black_box(right)))
    });
    c.bench_function("kernel/phonetic_match", |b| {
        b.iter(|| phonetic_match(black_box(left), black_box(right)))
    });
    c.bench_function("kernel/combined_score", |b| {
        b.iter(|| combined_score(black_box(left), black_box(right), &weights))
    });
}

fn bench_normalizer(c: &mut Criterion) {
    let normalizer = Normalizer::new();
    c.bench_function("normalizer/person_atom", |b| {
        b.iter(|| {
            normalizer
                .normalize(black_box("Rafaela C. Forzza"), EntityType::Pessoa)
                .unwrap()
        })
    });
}

fn bench_store_lookup(c: &mut Criterion) {
    let store = seeded_store(1_000);
    let normalizer = Normalizer::new();
    let key = normalizer.key_for("Silsanfor, A.B.", EntityType::Pessoa);

    c.bench_function("store/find_similar_1k", |b| {
        b.iter(|| {
            store
                .find_similar(black_box(&key), EntityType::Pessoa, 0.70)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_kernel, bench_normalizer, bench_store_lookup);
criterion_main!(benches);
