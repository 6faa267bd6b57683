use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use mesh_decomp::prelude::*;

fn bench_plane_cut(c: &mut Criterion) {
    let mut group = c.benchmark_group("plane_cut");

    for &n in &[4usize, 8, 12] {
        let background = tet_mesh(n, n, n, [0.0; 3], [1.0; 3]).expect("box mesh");
        group.bench_with_input(BenchmarkId::new("tet", n), &background, |b, bg| {
            b.iter(|| {
                let engine = LevelSetEngine::new(vec![LevelSet::plane(&[0.43, 0.51, 0.47], &[0.3, 0.8, -0.5])]);
                let out = IntegrationMeshGenerator::new(engine).generate(bg).expect("decomposition");
                black_box(out);
            });
        });
    }

    group.finish();
}

fn bench_two_interfaces(c: &mut Criterion) {
    let mut group = c.benchmark_group("two_interfaces");

    for &n in &[16usize, 32] {
        let background = tri_mesh(n, n, [0.0; 2], [1.0; 2]).expect("box mesh");
        group.bench_with_input(BenchmarkId::new("tri", n), &background, |b, bg| {
            b.iter(|| {
                let engine = LevelSetEngine::new(vec![
                    LevelSet::sphere(&[0.5, 0.5], 0.31),
                    LevelSet::plane(&[0.37, 0.0], &[1.0, 0.2]),
                ]);
                let out = IntegrationMeshGenerator::new(engine).generate(bg).expect("decomposition");
                black_box(out);
            });
        });
    }

    group.finish();
}

fn bench_template_generation(c: &mut Criterion) {
    use mesh_decomp::decomposition::classifier::PermutationKey;

    let keys = [
        PermutationKey { dim: 3, edge_count: 1, value: 10_002 },
        PermutationKey { dim: 3, edge_count: 3, value: 320 },
        PermutationKey { dim: 3, edge_count: 4, value: 5420 },
    ];
    c.bench_function("template_cold_cache", |b| {
        b.iter(|| {
            let library = TemplateLibrary::new();
            for key in keys {
                black_box(library.load_template(3, key).expect("template"));
            }
        });
    });
}

criterion_group!(benches, bench_plane_cut, bench_two_interfaces, bench_template_generation);
criterion_main!(benches);
