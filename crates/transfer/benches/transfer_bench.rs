use common::Money;
use criterion::{Criterion, criterion_group, criterion_main};
use document_store::InMemoryDocumentStore;
use transfer::{RetryPolicy, TransferCoordinator, TransferMode};

fn funded_coordinator(
    rt: &tokio::runtime::Runtime,
    mode: TransferMode,
) -> TransferCoordinator<InMemoryDocumentStore> {
    let store = InMemoryDocumentStore::new();
    let coordinator = TransferCoordinator::with_mode(store, RetryPolicy::default(), mode);
    rt.block_on(async {
        for number in ["A", "B"] {
            coordinator
                .accounts()
                .open_account(number, Money::from_cents(i64::MAX / 4))
                .await
                .unwrap();
        }
    });
    coordinator
}

fn bench_transfer_modes(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    for mode in [TransferMode::Standard, TransferMode::Bulk, TransferMode::Nested] {
        let coordinator = funded_coordinator(&rt, mode);
        c.bench_function(&format!("transfer/{mode}"), |b| {
            b.iter(|| {
                rt.block_on(async {
                    coordinator
                        .transfer("A", "B", Money::from_cents(1))
                        .await
                        .unwrap();
                });
            });
        });
    }
}

fn bench_insufficient_funds(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = TransferCoordinator::new(InMemoryDocumentStore::new(), RetryPolicy::default());
    rt.block_on(async {
        coordinator
            .accounts()
            .open_account("poor", Money::zero())
            .await
            .unwrap();
        coordinator
            .accounts()
            .open_account("rich", Money::zero())
            .await
            .unwrap();
    });

    c.bench_function("transfer/insufficient_funds", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = coordinator
                    .transfer("poor", "rich", Money::from_cents(1))
                    .await;
            });
        });
    });
}

fn bench_retry_after_conflict(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryDocumentStore::new();
    let coordinator = TransferCoordinator::new(
        store.clone(),
        RetryPolicy::default().without_backoff(),
    );
    rt.block_on(async {
        for number in ["A", "B"] {
            coordinator
                .accounts()
                .open_account(number, Money::from_cents(i64::MAX / 4))
                .await
                .unwrap();
        }
    });

    c.bench_function("transfer/retry_after_conflict", |b| {
        b.iter(|| {
            store.fail_next_commits(1);
            rt.block_on(async {
                coordinator
                    .transfer("A", "B", Money::from_cents(1))
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_transfer_modes,
    bench_insufficient_funds,
    bench_retry_after_conflict
);
criterion_main!(benches);
