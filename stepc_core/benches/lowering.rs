use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use stepc_core::exec::{Process, World};
use stepc_core::program::*;
use stepc_core::session::Session;
use stepc_core::{CompiledUnit, compile_unit};

fn counter(var: &str) -> Stmt {
    Stmt::assign(
        Expr::ident(var),
        Expr::binary(BinOp::Add, Expr::ident(var), Expr::int(1)),
    )
}

#[inline(always)]
fn straight_unit() -> CompilationUnit {
    let mut main = Method::new("main", (0..50).map(|_| counter("i")).collect());
    main.locals.push(LocalDecl::new("i", Type::Int));
    CompilationUnit {
        name: "straight".to_owned(),
        methods: vec![main],
        ..Default::default()
    }
}

#[inline(always)]
fn nested_unit() -> CompilationUnit {
    // while (i < 100) { atomic { try { { var t; t = choose(bool); if (t) raise E; } } catch (E) { i = i + 1; } } yield; }
    let mut body = Stmt::while_loop(
        Expr::binary(BinOp::Lt, Expr::ident("i"), Expr::int(100)),
        Stmt::seq(vec![
            Stmt::atomic(Stmt::try_with(
                Stmt::block(
                    vec![LocalDecl::new("t", Type::Bool)],
                    vec![
                        Stmt::assign(Expr::ident("t"), Expr::choose(ChooseDomain::Bool)),
                        Stmt::if_else(Expr::ident("t"), Stmt::raise("E"), None),
                    ],
                ),
                vec![(Some("E"), counter("i"))],
            )),
            Stmt::yield_now(),
        ]),
    );
    for depth in 0..8 {
        body = Stmt::block(
            vec![LocalDecl::new(&format!("v{depth}"), Type::Int)],
            vec![counter(&format!("v{depth}")), body],
        );
    }
    let mut main = Method::new("main", vec![body]);
    main.locals.push(LocalDecl::new("i", Type::Int));
    CompilationUnit {
        name: "nested".to_owned(),
        methods: vec![main],
        ..Default::default()
    }
}

fn lower(c: &mut Criterion) {
    let units = [(straight_unit(), "straight"), (nested_unit(), "nested")];
    for (unit, name) in units.iter() {
        c.bench_with_input(BenchmarkId::new("compile unit", name), unit, |b, unit| {
            b.iter(|| compile_unit(unit, &mut Session::default()).unwrap());
        });
    }
}

fn execute(c: &mut Criterion) {
    let units: Vec<(CompiledUnit, &str)> = [(straight_unit(), "straight"), (nested_unit(), "nested")]
        .iter()
        .map(|(unit, name)| (compile_unit(unit, &mut Session::default()).unwrap(), *name))
        .collect();
    for (unit, name) in units.iter() {
        c.bench_with_input(BenchmarkId::new("execute to termination", name), unit, |b, unit| {
            b.iter(|| {
                let mut world = World::new(unit);
                let mut process = Process::new(unit, "main", Vec::new()).unwrap();
                process.run(unit, &mut world, |domain| domain[1].clone()).unwrap().clone()
            });
        });
    }
}

criterion_group!(benches, lower, execute);
criterion_main!(benches);
