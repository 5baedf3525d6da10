use chrono::Duration;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use authgate_auth::{TokenIssuer, TokenIssuerConfig};

fn bench_issue(c: &mut Criterion) {
    let issuer = TokenIssuer::new(&TokenIssuerConfig::new("bench-secret", Duration::days(30)));

    c.bench_function("session_token_issue", |b| {
        b.iter(|| issuer.issue(black_box("uid-benchmark")).unwrap())
    });
}

fn bench_verify(c: &mut Criterion) {
    let issuer = TokenIssuer::new(&TokenIssuerConfig::new("bench-secret", Duration::days(30)));
    let token = issuer.issue("uid-benchmark").unwrap();

    c.bench_function("session_token_verify", |b| {
        b.iter(|| issuer.verify(black_box(&token)).unwrap())
    });
}

criterion_group!(benches, bench_issue, bench_verify);
criterion_main!(benches);
