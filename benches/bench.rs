// Criterion benchmarks for Tutor Match

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tutor_match::core::features::extract_features;
use tutor_match::core::{cosine_similarity, CandidateSelector, FeatureVector, Matcher, Ranker};
use tutor_match::models::{Order, SubjectRef, TutorCandidate};
use tutor_match::services::InMemoryTutorDirectory;

fn create_tutor(id: usize) -> TutorCandidate {
    TutorCandidate {
        id: id as i64,
        name: format!("Tutor {}", id),
        bio: "Mathematics and physics tutor".to_string(),
        hourly_rate: 800.0 + (id % 20) as f64 * 100.0,
        rating: 3.0 + (id % 20) as f64 * 0.1,
        rating_count: (id % 150) as u32,
        experience_years: (id % 15) as u32,
        city: if id % 4 == 0 { "Kazan" } else { "Moscow" }.to_string(),
        region: "Moscow Region".to_string(),
        is_verified: id % 5 != 0,
        is_active: true,
        embedding: Some((0..64).map(|d| ((id + d) % 7) as f32 / 7.0).collect()),
        subjects: vec![SubjectRef { id: 1, name: "Mathematics".to_string() }],
        availability: None,
    }
}

fn create_order() -> Order {
    Order {
        id: 1,
        student_id: 100,
        subject: SubjectRef { id: 1, name: "Mathematics".to_string() },
        title: "Exam preparation".to_string(),
        description: "Algebra and geometry".to_string(),
        goal_text: "Final exam".to_string(),
        budget_min: 1000.0,
        budget_max: 2000.0,
        format_online: false,
        format_offline: true,
        city: "Moscow".to_string(),
        region: "Moscow Region".to_string(),
        schedule: None,
    }
}

fn bench_cosine_similarity(c: &mut Criterion) {
    let a: Vec<f32> = (0..1536).map(|i| (i % 13) as f32 / 13.0).collect();
    let b: Vec<f32> = (0..1536).map(|i| (i % 7) as f32 / 7.0).collect();

    c.bench_function("cosine_similarity_1536", |bench| {
        bench.iter(|| cosine_similarity(black_box(&a), black_box(&b)));
    });
}

fn bench_selection(c: &mut Criterion) {
    let order = create_order();
    let selector = CandidateSelector::default();
    let population: Vec<TutorCandidate> = (0..1000).map(create_tutor).collect();

    c.bench_function("candidate_selection_1000", |b| {
        b.iter(|| selector.select(black_box(&order), black_box(population.clone())));
    });
}

fn bench_ranking(c: &mut Criterion) {
    let order = create_order();
    let ranker = Ranker::fallback();
    let embedding: Vec<f32> = (0..64).map(|d| (d % 5) as f32 / 5.0).collect();
    let features: Vec<FeatureVector> = (0..200)
        .map(|i| extract_features(&order, &create_tutor(i), Some(&embedding)))
        .collect();

    c.bench_function("fallback_scoring_200", |b| {
        b.iter(|| ranker.score(black_box(&features)));
    });
}

fn bench_matching(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let order = create_order();

    let mut group = c.benchmark_group("matching");

    for tutor_count in [10, 50, 100, 500, 1000].iter() {
        let tutors: Vec<TutorCandidate> = (0..*tutor_count).map(create_tutor).collect();
        let matcher = Matcher::new(
            Arc::new(InMemoryTutorDirectory::new(tutors)),
            Arc::new(Ranker::fallback()),
        );

        group.bench_with_input(
            BenchmarkId::new("get_matches", tutor_count),
            tutor_count,
            |b, _| {
                b.iter(|| runtime.block_on(matcher.get_matches(black_box(&order), black_box(10))));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cosine_similarity,
    bench_selection,
    bench_ranking,
    bench_matching
);

criterion_main!(benches);
