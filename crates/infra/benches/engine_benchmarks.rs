use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::runtime::Runtime;

use walletd_core::WalletId;
use walletd_infra::store::InMemoryLedgerStore;
use walletd_infra::{BalanceEngine, Directory, WalletProvisioner};
use walletd_wallets::NewUser;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn funded_wallet(store: &InMemoryLedgerStore, name: &str, balance: Decimal) -> WalletId {
    let user = store
        .create_user(NewUser::new(name, format!("{name}@bench.local")).unwrap())
        .await
        .unwrap();
    let wallet = WalletProvisioner::new(store.clone(), store.clone())
        .create_wallet(user.id)
        .await
        .unwrap();
    BalanceEngine::new(store.clone())
        .deposit(wallet.id(), balance)
        .await
        .unwrap();
    wallet.id()
}

fn bench_single_wallet_latency(c: &mut Criterion) {
    let rt = runtime();
    let store = InMemoryLedgerStore::new();
    let engine = BalanceEngine::new(store.clone());
    let wallet = rt.block_on(funded_wallet(&store, "latency", dec!(1000000.00)));

    let mut group = c.benchmark_group("single_wallet_latency");

    group.bench_function("deposit", |b| {
        b.iter(|| rt.block_on(engine.deposit(black_box(wallet), dec!(1.00))).unwrap())
    });

    group.bench_function("withdraw", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine.deposit(wallet, dec!(1.00)).await.unwrap();
                engine.withdraw(black_box(wallet), dec!(1.00)).await.unwrap()
            })
        })
    });

    group.bench_function("get_balance", |b| {
        b.iter(|| rt.block_on(engine.get_balance(black_box(wallet))).unwrap())
    });

    group.finish();
}

fn bench_transfer_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("transfer_throughput");

    for concurrency in [1usize, 4, 16].iter() {
        let store = InMemoryLedgerStore::new();
        let engine = BalanceEngine::new(store.clone());
        let (a, b) = rt.block_on(async {
            (
                funded_wallet(&store, &format!("a{concurrency}"), dec!(1000000.00)).await,
                funded_wallet(&store, &format!("b{concurrency}"), dec!(1000000.00)).await,
            )
        });

        group.throughput(Throughput::Elements(*concurrency as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            concurrency,
            |bench, &concurrency| {
                bench.iter(|| {
                    rt.block_on(async {
                        let handles: Vec<_> = (0..concurrency)
                            .map(|i| {
                                let engine = engine.clone();
                                let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
                                tokio::spawn(async move {
                                    engine.transfer(from, to, dec!(0.01)).await.unwrap()
                                })
                            })
                            .collect();
                        for handle in handles {
                            handle.await.unwrap();
                        }
                    })
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_single_wallet_latency, bench_transfer_throughput);
criterion_main!(benches);
