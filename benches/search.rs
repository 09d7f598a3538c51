//! Performance benchmarks for hybrid retrieval.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use engram::embedding::tfidf::TfIdfEmbedder;
use engram::index::sqlite::SqliteIndex;
use engram::tenant::TenantContext;
use engram::types::{RememberInput, Visibility};
use engram::{recall, remember, EngineConfig};
use tokio::runtime::Runtime;

const SAMPLE_CONTENTS: &[&str] = &[
    "Authentication using JWT tokens and refresh mechanism",
    "Database migration strategy for PostgreSQL",
    "React component lifecycle and hooks optimization",
    "API rate limiting implementation with Redis",
    "Docker container orchestration with Kubernetes",
    "GraphQL schema design best practices",
    "Microservices communication patterns",
    "CI/CD pipeline configuration with GitHub Actions",
    "Memory leak detection in Node.js applications",
    "Rust ownership and borrowing concepts",
];

async fn seed(index: &SqliteIndex, embedder: &TfIdfEmbedder, config: &EngineConfig, count: usize) {
    let ctx = TenantContext::user("bench-user");
    for i in 0..count {
        let content = format!(
            "{} - variation {} with additional context about software development",
            SAMPLE_CONTENTS[i % SAMPLE_CONTENTS.len()],
            i
        );
        let input = RememberInput {
            content,
            gate: "epistemic".to_string(),
            person: None,
            project: None,
            visibility: Visibility::Private,
            team_id: None,
        };
        remember::remember(&ctx, index, embedder, None, config, input)
            .await
            .unwrap();
    }
}

fn bench_recall(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let config = EngineConfig::default();
    let mut group = c.benchmark_group("recall");

    for size in [10usize, 100, 1_000] {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        rt.block_on(seed(&index, &embedder, &config, size));

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("hybrid_search", size), &size, |b, _| {
            let ctx = TenantContext::user("bench-user");
            b.iter(|| {
                rt.block_on(recall::recall(&ctx, &index, &embedder, &config, black_box("Kubernetes development")))
                    .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_recall);
criterion_main!(benches);
