//! 依赖图与解析器基准测试

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use semver::Version;

use taro_core::module::{
    topo_sort, DependencyDescriptor, FeatureDescriptor, ModuleDescriptor, ModuleManageState,
    ModuleRegistry, RuntimeResolver,
};

/// 生成链式依赖的特性 ID 集合：f0 <- f1 <- ... <- f(n-1)
fn chain_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("f{}", i)).collect()
}

fn bench_topo_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("topo_sort");
    for size in [100, 1000, 5000] {
        let ids = chain_ids(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &ids, |b, ids| {
            b.iter(|| {
                let outcome = topo_sort(black_box(ids.clone()), |id| {
                    let idx: usize = id[1..].parse().unwrap();
                    if idx == 0 {
                        vec![]
                    } else {
                        vec![format!("f{}", idx - 1)]
                    }
                });
                assert!(outcome.cycle.is_none());
                outcome.sorted
            })
        });
    }
    group.finish();
}

/// 每个模块一个特性，链式依赖前一个模块
fn build_registry(n: usize) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    for i in 0..n {
        let id = format!("m{}", i);
        let mut feature = FeatureDescriptor::new(id.clone(), id.clone());
        if i > 0 {
            feature = feature.with_dependency(DependencyDescriptor::new(format!("m{}", i - 1)));
        }
        let mut module =
            ModuleDescriptor::new(id.clone(), Version::new(1, 0, 0)).with_feature(feature);
        module.manage_state = ModuleManageState::Installed;
        registry.register(module).unwrap();
    }
    registry
}

fn bench_resolve(c: &mut Criterion) {
    let resolver = RuntimeResolver::new(Version::new(3, 0, 0));
    let mut group = c.benchmark_group("resolve");
    for size in [100, 1000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            &size,
            |b, &size| {
                let mut registry = build_registry(size);
                b.iter(|| {
                    let resolution = resolver.resolve(black_box(&mut registry));
                    assert_eq!(resolution.feature_order.len(), size);
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_topo_sort, bench_resolve);
criterion_main!(benches);
