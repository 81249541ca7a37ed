use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use portero::core::builder::{DescriptorBuilder, LoginRequest, NumericField};
use portero::core::probe::parse_keyspace;
use portero::core::registry::ConnectionRegistry;

fn standalone_request(db_index: u32) -> LoginRequest {
    LoginRequest {
        label: Some("bench".to_string()),
        hostname: Some("10.0.0.5".to_string()),
        port: Some(NumericField::Text("6380".to_string())),
        password: Some("secret".to_string()),
        db_index: Some(NumericField::from(db_index)),
        ..Default::default()
    }
}

fn sentinel_request() -> LoginRequest {
    LoginRequest {
        server_type: Some("sentinel".to_string()),
        sentinels: Some("10.0.0.1:26379, 10.0.0.2:26379, [::1]:26379".to_string()),
        sentinel_name: Some("mymaster".to_string()),
        sentinel_pw_type: Some("sentinel".to_string()),
        sentinel_password: Some("s3cret".to_string()),
        sentinel_tls: Some("custom".to_string()),
        sentinel_tls_ca: Some("-----BEGIN CERTIFICATE-----\\nMIIB\\n-----END CERTIFICATE-----".to_string()),
        redis_tls: Some("yes".to_string()),
        ..Default::default()
    }
}

/// Descriptor building and identity hashing
fn bench_builder(c: &mut Criterion) {
    let mut group = c.benchmark_group("descriptor_builder");

    let standalone = standalone_request(3);
    group.bench_function("build_standalone", |b| {
        b.iter(|| black_box(DescriptorBuilder::build(black_box(&standalone))))
    });

    let sentinel = sentinel_request();
    group.bench_function("build_sentinel_tls", |b| {
        b.iter(|| black_box(DescriptorBuilder::build(black_box(&sentinel))))
    });

    let descriptor = DescriptorBuilder::build(&sentinel).unwrap();
    group.bench_function("connection_id", |b| {
        b.iter(|| black_box(descriptor.connection_id()))
    });

    group.finish();
}

/// Duplicate detection against registries of growing size
fn bench_registry_contains(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_contains");

    for size in [10u32, 100, 1000].iter() {
        let mut registry = ConnectionRegistry::new();
        for db in 0..*size {
            let descriptor = DescriptorBuilder::build(&standalone_request(db)).unwrap();
            registry.insert(descriptor, ());
        }
        let missing = DescriptorBuilder::build(&standalone_request(size + 1)).unwrap();

        group.bench_with_input(BenchmarkId::new("miss", size), &missing, |b, missing| {
            b.iter(|| black_box(registry.contains(missing)))
        });
    }

    group.finish();
}

/// `INFO keyspace` parsing
fn bench_keyspace(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyspace");

    for databases in [1usize, 16, 256].iter() {
        let mut info = String::from("# Keyspace\r\n");
        for db in 0..*databases {
            info.push_str(&format!("db{}:keys={},expires=0,avg_ttl=0\r\n", db, db * 100));
        }

        group.bench_with_input(BenchmarkId::new("parse", databases), &info, |b, info| {
            b.iter(|| black_box(parse_keyspace(black_box(info))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_builder, bench_registry_contains, bench_keyspace);
criterion_main!(benches);
