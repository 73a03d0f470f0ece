use stepc_core::exec::{Effect, Process, Status, StepOutcome, World};
use stepc_core::ir::{Op, PatternGuard};
use stepc_core::program::*;
use stepc_core::session::Session;
use stepc_core::step_machine::{BlockSymbol, Epilogue, StepMachine};
use stepc_core::{CompiledUnit, compile_unit};
use std::collections::{BTreeMap, VecDeque};

fn color() -> TypeDecl {
    TypeDecl {
        name: "Color".to_owned(),
        kind: TypeDeclKind::Enum(vec!["Red".to_owned(), "Blue".to_owned()]),
        span: Span::default(),
    }
}

fn global(name: &str, ty: Type, init: Option<Val>) -> Global {
    Global {
        name: name.to_owned(),
        ty,
        init,
        span: Span::default(),
    }
}

fn unit(globals: Vec<Global>, methods: Vec<Method>) -> CompilationUnit {
    CompilationUnit {
        name: "test".to_owned(),
        types: vec![color()],
        globals,
        methods,
        ..Default::default()
    }
}

fn compile(unit: &CompilationUnit) -> anyhow::Result<CompiledUnit> {
    Ok(compile_unit(unit, &mut Session::default())?)
}

fn with_locals(mut method: Method, locals: Vec<LocalDecl>) -> Method {
    method.locals = locals;
    method
}

fn returning(mut method: Method, ty: Type) -> Method {
    method.ret = Some(ty);
    method
}

fn add(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinOp::Add, lhs, rhs)
}

fn incr(var: &str) -> Stmt {
    Stmt::assign(Expr::ident(var), add(Expr::ident(var), Expr::int(1)))
}

/// Runs `main` to completion, always picking the last value of a choice.
fn run(unit: &CompiledUnit) -> anyhow::Result<(Status, World)> {
    let mut world = World::new(unit);
    let mut process = Process::new(unit, "main", Vec::new())?;
    let status = process
        .run(unit, &mut world, |domain| domain[domain.len() - 1].clone())?
        .clone();
    Ok((status, world))
}

fn traces(world: &World) -> Vec<&str> {
    world
        .effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Trace(line) => Some(line.as_str()),
            _ => None,
        })
        .collect()
}

fn returned(val: Integer) -> Status {
    Status::Returned {
        ret: Some(Val::Int(val)),
        outputs: Vec::new(),
    }
}

#[test]
fn while_loop() -> anyhow::Result<()> {
    // s = 0; i = 0; while (i < 5) { s = s + i; i = i + 1; } return s;
    let main = returning(
        with_locals(
            Method::new(
                "main",
                vec![
                    Stmt::while_loop(
                        Expr::binary(BinOp::Lt, Expr::ident("i"), Expr::int(5)),
                        Stmt::seq(vec![
                            Stmt::assign(Expr::ident("s"), add(Expr::ident("s"), Expr::ident("i"))),
                            incr("i"),
                        ]),
                    ),
                    Stmt::ret(Some(Expr::ident("s"))),
                ],
            ),
            vec![
                LocalDecl::new("s", Type::Int).with_init(Expr::int(0)),
                LocalDecl::new("i", Type::Int),
            ],
        ),
        Type::Int,
    );
    let compiled = compile(&unit(Vec::new(), vec![main]))?;
    let (status, _) = run(&compiled)?;
    assert_eq!(status, returned(10));
    Ok(())
}

#[test]
fn backward_goto() -> anyhow::Result<()> {
    // top: if (i < 3) { i = i + 1; goto top; } return i;
    let main = returning(
        with_locals(
            Method::new(
                "main",
                vec![
                    Stmt::labeled(
                        "top",
                        Stmt::if_else(
                            Expr::binary(BinOp::Lt, Expr::ident("i"), Expr::int(3)),
                            Stmt::seq(vec![incr("i"), Stmt::goto("top")]),
                            None,
                        ),
                    ),
                    Stmt::ret(Some(Expr::ident("i"))),
                ],
            ),
            vec![LocalDecl::new("i", Type::Int)],
        ),
        Type::Int,
    );
    let compiled = compile(&unit(Vec::new(), vec![main]))?;
    let (status, _) = run(&compiled)?;
    assert_eq!(status, returned(3));
    Ok(())
}

#[test]
fn foreach_over_snapshot() -> anyhow::Result<()> {
    // foreach (e in {1, 2, 3}) s = s + e; return s;
    let main = returning(
        with_locals(
            Method::new(
                "main",
                vec![
                    Stmt::foreach(
                        LocalDecl::new("e", Type::Int),
                        Expr::set(vec![Expr::int(1), Expr::int(2), Expr::int(3)]),
                        Stmt::assign(Expr::ident("s"), add(Expr::ident("s"), Expr::ident("e"))),
                    ),
                    Stmt::ret(Some(Expr::ident("s"))),
                ],
            ),
            vec![LocalDecl::new("s", Type::Int)],
        ),
        Type::Int,
    );
    let compiled = compile(&unit(Vec::new(), vec![main]))?;
    let machine = compiled.machine("main").expect("main");
    // The foreach scope owns the snapshot, the cursor and the bound variable.
    assert_eq!(machine.cleanups.len(), 1);
    assert_eq!(machine.cleanups[0].resets.len(), 3);
    let (status, _) = run(&compiled)?;
    assert_eq!(status, returned(6));
    Ok(())
}

#[test]
fn call_with_result_and_outputs() -> anyhow::Result<()> {
    let mut sum = returning(
        Method::new(
            "sum",
            vec![Stmt::ret(Some(add(Expr::ident("a"), Expr::ident("b"))))],
        ),
        Type::Int,
    );
    sum.params = vec![Param::new("a", Type::Int), Param::new("b", Type::Int)];
    let mut double = Method::new(
        "double",
        vec![Stmt::assign(
            Expr::ident("q"),
            Expr::binary(BinOp::Mul, Expr::ident("n"), Expr::int(2)),
        )],
    );
    double.params = vec![Param::new("n", Type::Int)];
    double.outputs = vec![Param::new("q", Type::Int)];

    // x = sum(2, 3); double(x, out y); return y;
    let main = returning(
        with_locals(
            Method::new(
                "main",
                vec![
                    Stmt::call(
                        Call::new("sum", vec![Expr::int(2), Expr::int(3)]).with_result(Expr::ident("x")),
                    ),
                    Stmt::call(Call {
                        outputs: vec![Expr::ident("y")],
                        ..Call::new("double", vec![Expr::ident("x")])
                    }),
                    Stmt::ret(Some(Expr::ident("y"))),
                ],
            ),
            vec![LocalDecl::new("x", Type::Int), LocalDecl::new("y", Type::Int)],
        ),
        Type::Int,
    );
    let compiled = compile(&unit(Vec::new(), vec![sum, double, main]))?;
    let (status, _) = run(&compiled)?;
    assert_eq!(status, returned(10));
    Ok(())
}

#[test]
fn exception_from_callee() -> anyhow::Result<()> {
    let fail = Method::new("fail", vec![Stmt::raise("E")]);
    // try { fail(); trace("after"); } catch (E) { trace("caught"); } trace("done");
    let main = Method::new(
        "main",
        vec![
            Stmt::try_with(
                Stmt::seq(vec![
                    Stmt::call(Call::new("fail", Vec::new())),
                    Stmt::trace("after", Vec::new()),
                ]),
                vec![(Some("E"), Stmt::trace("caught", Vec::new()))],
            ),
            Stmt::trace("done", Vec::new()),
        ],
    );
    let uncaught = Method::new("uncaught", vec![Stmt::call(Call::new("fail", Vec::new()))]);
    let compiled = compile(&unit(Vec::new(), vec![fail, main, uncaught]))?;

    let (status, world) = run(&compiled)?;
    assert!(matches!(status, Status::Returned { .. }));
    assert_eq!(traces(&world), vec!["caught", "done"]);

    let mut world = World::new(&compiled);
    let mut process = Process::new(&compiled, "uncaught", Vec::new())?;
    let status = process.run(&compiled, &mut world, |domain| domain[0].clone())?;
    assert_eq!(status, &Status::Raised("E".to_owned()));
    Ok(())
}

#[test]
fn unmatched_exception_is_reraised() -> anyhow::Result<()> {
    // try { raise F; } catch (E) { trace("wrong"); }
    let main = Method::new(
        "main",
        vec![Stmt::try_with(
            Stmt::raise("F"),
            vec![(Some("E"), Stmt::trace("wrong", Vec::new()))],
        )],
    );
    let compiled = compile(&unit(Vec::new(), vec![main]))?;
    let (status, world) = run(&compiled)?;
    assert_eq!(status, Status::Raised("F".to_owned()));
    assert!(traces(&world).is_empty());
    Ok(())
}

#[test]
fn choice_over_enum() -> anyhow::Result<()> {
    // c = choose(Color); trace("{}", c);
    let main = with_locals(
        Method::new(
            "main",
            vec![
                Stmt::assign(Expr::ident("c"), Expr::choose(ChooseDomain::Type("Color".to_owned()))),
                Stmt::trace("{}", vec![Expr::ident("c")]),
            ],
        ),
        vec![LocalDecl::new("c", Type::Named("Color".to_owned()))],
    );
    let compiled = compile(&unit(Vec::new(), vec![main]))?;
    let mut world = World::new(&compiled);
    let mut process = Process::new(&compiled, "main", Vec::new())?;
    let mut domains = Vec::new();
    process.run(&compiled, &mut world, |domain| {
        domains.push(domain.to_vec());
        domain[1].clone()
    })?;
    assert_eq!(domains, vec![vec![Val::Int(0), Val::Int(1)]]);
    assert_eq!(traces(&world), vec!["1"]);
    Ok(())
}

#[test]
fn choice_halves_share_scope() -> anyhow::Result<()> {
    // { var b: bool; b = choose(bool); trace("{}", b); }
    let main = Method::new(
        "main",
        vec![Stmt::block(
            vec![LocalDecl::new("b", Type::Bool)],
            vec![
                Stmt::assign(Expr::ident("b"), Expr::choose(ChooseDomain::Bool)),
                Stmt::trace("{}", vec![Expr::ident("b")]),
            ],
        )],
    );
    let compiled = compile(&unit(Vec::new(), vec![main]))?;
    let machine = compiled.machine("main").expect("main");
    let start = machine
        .procedures
        .iter()
        .find(|p| matches!(p.body.first(), Some(Op::ChooseStart(_))))
        .expect("choice start");
    let Epilogue::Goto(edge) = &start.epilogue else {
        panic!("unexpected epilogue {:?}", start.epilogue);
    };
    assert!(edge.cleanups.is_empty());
    let finish = machine.procedure(edge.target).expect("choice finish");
    assert!(matches!(finish.body.first(), Some(Op::ChooseFinish(_))));

    let (_, world) = run(&compiled)?;
    assert_eq!(traces(&world), vec!["true"]);
    Ok(())
}

#[test]
fn atomic_region_runs_in_one_step() -> anyhow::Result<()> {
    // atomic { g = 1; g = 2; }
    let main = Method::new(
        "main",
        vec![Stmt::atomic(Stmt::seq(vec![
            Stmt::assign(Expr::ident("g"), Expr::int(1)),
            Stmt::assign(Expr::ident("g"), Expr::int(2)),
        ]))],
    );
    let compiled = compile(&unit(vec![global("g", Type::Int, None)], vec![main]))?;
    let machine = compiled.machine("main").expect("main");
    assert_eq!(machine.atomic_entry.len(), 1);

    let mut world = World::new(&compiled);
    let mut process = Process::new(&compiled, "main", Vec::new())?;
    assert_eq!(process.step(&compiled, &mut world)?, StepOutcome::Suspended);
    assert!(machine.atomic_entry.contains(&process.frame().expect("frame").current()));
    assert_eq!(world.global(&compiled, "g")?, &Val::Int(0));
    assert_eq!(process.step(&compiled, &mut world)?, StepOutcome::Suspended);
    assert_eq!(world.global(&compiled, "g")?, &Val::Int(2));
    assert_eq!(process.atomicity(), 0);
    assert_eq!(process.step(&compiled, &mut world)?, StepOutcome::Finished);
    Ok(())
}

/// Follows every edge from Enter, checking that the atomic level of each block is well defined
/// and that every exit of the method is at level 0.
fn check_telescoping(machine: &StepMachine) {
    fn visit(
        levels: &mut BTreeMap<BlockSymbol, i32>,
        queue: &mut VecDeque<BlockSymbol>,
        target: BlockSymbol,
        level: i32,
    ) {
        assert!(level >= 0, "negative level at {target}");
        match levels.insert(target, level) {
            Some(previous) => assert_eq!(previous, level, "inconsistent level at {target}"),
            None => queue.push_back(target),
        }
    }

    let mut levels = BTreeMap::from([(BlockSymbol::ENTER, 0)]);
    let mut queue = VecDeque::from([BlockSymbol::ENTER]);
    let mut exits = 0;
    while let Some(symbol) = queue.pop_front() {
        let procedure = machine.procedure(symbol).expect("procedure");
        let level = levels[&symbol];
        for edge in procedure.epilogue.edges() {
            visit(&mut levels, &mut queue, edge.target, level + edge.atomic_delta);
        }
        if let Epilogue::Return { atomic_delta } = procedure.epilogue {
            assert_eq!(level + atomic_delta, 0, "return at level {level} from {symbol}");
            exits += 1;
        }
        if let Some(exit) = &procedure.on_exception {
            match exit.target {
                Some(target) => visit(&mut levels, &mut queue, target, level + exit.atomic_delta),
                None => {
                    assert_eq!(level + exit.atomic_delta, 0);
                    exits += 1;
                }
            }
        }
    }
    assert!(exits > 0);
}

#[test]
fn atomic_levels_telescope() -> anyhow::Result<()> {
    let main = with_locals(
        Method::new(
            "main",
            vec![
                // try { atomic { i = 1; atomic { i = 2; if (i == 2) raise E; } } } catch (E) {}
                Stmt::try_with(
                    Stmt::atomic(Stmt::seq(vec![
                        Stmt::assign(Expr::ident("i"), Expr::int(1)),
                        Stmt::atomic(Stmt::seq(vec![
                            Stmt::assign(Expr::ident("i"), Expr::int(2)),
                            Stmt::if_else(
                                Expr::binary(BinOp::Eq, Expr::ident("i"), Expr::int(2)),
                                Stmt::raise("E"),
                                None,
                            ),
                        ])),
                    ])),
                    vec![(Some("E"), Stmt::skip())],
                ),
                // atomic { i = i + 1; goto out; }
                Stmt::atomic(Stmt::seq(vec![incr("i"), Stmt::goto("out")])),
                // out: if (i > 100) atomic { return; }
                Stmt::labeled(
                    "out",
                    Stmt::if_else(
                        Expr::binary(BinOp::Gt, Expr::ident("i"), Expr::int(100)),
                        Stmt::atomic(Stmt::ret(None)),
                        None,
                    ),
                ),
                Stmt::trace("{}", vec![Expr::ident("i")]),
            ],
        ),
        vec![LocalDecl::new("i", Type::Int)],
    );
    let compiled = compile(&unit(Vec::new(), vec![main]))?;
    check_telescoping(compiled.machine("main").expect("main"));

    let (status, world) = run(&compiled)?;
    assert!(matches!(status, Status::Returned { .. }));
    assert_eq!(traces(&world), vec!["3"]);
    Ok(())
}

#[test]
fn receive_blocks_until_message() -> anyhow::Result<()> {
    // receive(c, x); trace("{}", x);
    let main = with_locals(
        Method::new(
            "main",
            vec![
                Stmt::receive(Expr::ident("c"), Expr::ident("x")),
                Stmt::trace("{}", vec![Expr::ident("x")]),
            ],
        ),
        vec![LocalDecl::new("x", Type::Int)],
    );
    let chan = global("c", Type::Chan(Box::new(Type::Int)), Some(Val::Chan(Some(0))));
    let compiled = compile(&unit(vec![chan], vec![main]))?;
    let machine = compiled.machine("main").expect("main");
    assert_eq!(machine.runnable.len(), 1);
    let (guard, entry) = machine.runnable.iter().next().expect("guard");
    assert_eq!(&entry.guard, guard);
    assert!(matches!(
        entry.clauses.as_slice(),
        [clause] if matches!(clause.as_slice(), [PatternGuard::ChannelReady { ty: Some(Type::Int), .. }])
    ));
    assert!(machine.valid_end_state.is_empty());

    let mut world = World::new(&compiled);
    assert_eq!(world.new_channel(), Val::Chan(Some(0)));
    let mut process = Process::new(&compiled, "main", Vec::new())?;
    assert_eq!(process.step(&compiled, &mut world)?, StepOutcome::Suspended);
    assert!(!process.runnable(&compiled, &world)?);
    assert_eq!(process.step(&compiled, &mut world)?, StepOutcome::Blocked);
    // A message of the wrong type does not enable the guard.
    world.channels[0].push_back(Val::Bool(true));
    assert!(!process.runnable(&compiled, &world)?);
    world.channels[0].clear();

    world.channels[0].push_back(Val::Int(7));
    assert!(process.runnable(&compiled, &world)?);
    let status = process.run(&compiled, &mut world, |domain| domain[0].clone())?;
    assert!(matches!(status, Status::Returned { .. }));
    assert_eq!(
        world.effects,
        vec![
            Effect::Receive {
                chan: 0,
                msg: Val::Int(7)
            },
            Effect::Trace("7".to_owned()),
        ]
    );
    assert!(world.channels[0].is_empty());
    Ok(())
}

#[test]
fn select_takes_the_chosen_clause() -> anyhow::Result<()> {
    // end select { wait(flag) -> trace("wait"); timeout -> trace("timeout"); }
    let main = Method::new(
        "main",
        vec![Stmt::select(
            true,
            vec![
                (
                    vec![JoinPattern::Wait(Expr::ident("flag"))],
                    Stmt::trace("wait", Vec::new()),
                ),
                (vec![JoinPattern::Timeout], Stmt::trace("timeout", Vec::new())),
            ],
        )],
    );
    let compiled = compile(&unit(vec![global("flag", Type::Bool, None)], vec![main]))?;
    let machine = compiled.machine("main").expect("main");

    let mut world = World::new(&compiled);
    let mut process = Process::new(&compiled, "main", Vec::new())?;
    assert_eq!(process.step(&compiled, &mut world)?, StepOutcome::Suspended);
    let guard = process.frame().expect("frame").current();
    assert!(machine.is_guard(guard));
    assert!(machine.valid_end_state.contains(&guard));
    assert_eq!(
        process.enabled_clauses(&compiled, &world)?,
        Some(vec![false, true])
    );

    let mut flagged = world.clone();
    let mut waiting = process.clone();
    flagged.set_global(&compiled, "flag", Val::Bool(true))?;
    waiting.select(0)?;
    waiting.run(&compiled, &mut flagged, |domain| domain[0].clone())?;
    assert_eq!(traces(&flagged), vec!["wait"]);

    process.select(1)?;
    process.run(&compiled, &mut world, |domain| domain[0].clone())?;
    assert_eq!(traces(&world), vec!["timeout"]);
    Ok(())
}

#[test]
fn guard_propagates_to_atomic_entry() -> anyhow::Result<()> {
    // atomic { receive(c, x); }
    let main = with_locals(
        Method::new(
            "main",
            vec![Stmt::atomic(Stmt::receive(Expr::ident("c"), Expr::ident("x")))],
        ),
        vec![LocalDecl::new("x", Type::Int)],
    );
    let chan = global("c", Type::Chan(Box::new(Type::Int)), Some(Val::Chan(Some(0))));
    let compiled = compile(&unit(vec![chan], vec![main]))?;
    let machine = compiled.machine("main").expect("main");
    let entry = *machine.atomic_entry.iter().next().expect("atomic entry");
    assert_eq!(machine.runnable.len(), 2);
    let guard = machine.runnable[&entry].guard;
    assert_ne!(guard, entry);
    assert!(machine.is_guard(guard));
    assert!(!machine.is_guard(entry));
    Ok(())
}

#[test]
fn blocked_atomic_entry_runs_nothing() -> anyhow::Result<()> {
    // atomic { receive(c, x); } return x;
    let main = returning(
        with_locals(
            Method::new(
                "main",
                vec![
                    Stmt::atomic(Stmt::receive(Expr::ident("c"), Expr::ident("x"))),
                    Stmt::ret(Some(Expr::ident("x"))),
                ],
            ),
            vec![LocalDecl::new("x", Type::Int)],
        ),
        Type::Int,
    );
    let chan = global("c", Type::Chan(Box::new(Type::Int)), Some(Val::Chan(Some(0))));
    let compiled = compile(&unit(vec![chan], vec![main]))?;
    let machine = compiled.machine("main").expect("main");
    let entry = *machine.atomic_entry.iter().next().expect("atomic entry");

    let mut world = World::new(&compiled);
    world.new_channel();
    let mut process = Process::new(&compiled, "main", Vec::new())?;
    assert_eq!(process.step(&compiled, &mut world)?, StepOutcome::Suspended);
    assert_eq!(process.frame().expect("frame").current(), entry);
    assert!(!process.runnable(&compiled, &world)?);

    assert_eq!(process.step(&compiled, &mut world)?, StepOutcome::Blocked);
    // Still waiting in front of the region.
    assert_eq!(process.atomicity(), 0);
    assert!(!process.in_transition());
    assert_eq!(process.frame().expect("frame").current(), entry);

    world.channels[0].push_back(Val::Int(3));
    assert!(process.runnable(&compiled, &world)?);
    assert_eq!(process.step(&compiled, &mut world)?, StepOutcome::Suspended);
    assert_eq!(process.atomicity(), 0);
    let status = process.run(&compiled, &mut world, |domain| domain[0].clone())?;
    assert_eq!(status, &returned(3));
    Ok(())
}

#[test]
fn scope_exit_resets_locals() -> anyhow::Result<()> {
    let inner = |tail: Stmt| {
        Stmt::block(
            vec![LocalDecl::new("t", Type::Int)],
            vec![
                Stmt::trace("{}", vec![Expr::ident("t")]),
                Stmt::assign(Expr::ident("t"), Expr::int(9)),
                incr("i"),
                tail,
            ],
        )
    };
    let lt2 = || Expr::binary(BinOp::Lt, Expr::ident("i"), Expr::int(2));
    let locals = || vec![LocalDecl::new("i", Type::Int)];

    // while (i < 2) { var t; trace(t); t = 9; i = i + 1; }
    let looping = with_locals(
        Method::new("main", vec![Stmt::while_loop(lt2(), inner(Stmt::skip()))]),
        locals(),
    );
    // top: { var t; trace(t); t = 9; i = i + 1; if (i < 2) goto top; }
    let jumping = with_locals(
        Method::new(
            "main",
            vec![Stmt::labeled(
                "top",
                inner(Stmt::if_else(lt2(), Stmt::goto("top"), None)),
            )],
        ),
        locals(),
    );
    // while (i < 2) { try { var t; trace(t); t = 9; i = i + 1; raise E; } catch (E) {} }
    let raising = with_locals(
        Method::new(
            "main",
            vec![Stmt::while_loop(
                lt2(),
                Stmt::try_with(inner(Stmt::raise("E")), vec![(Some("E"), Stmt::skip())]),
            )],
        ),
        locals(),
    );

    for method in [looping, jumping, raising] {
        let compiled = compile(&unit(Vec::new(), vec![method]))?;
        let (_, world) = run(&compiled)?;
        assert_eq!(traces(&world), vec!["0", "0"]);
    }
    Ok(())
}

#[test]
fn struct_containing_itself_is_rejected() {
    let mut unit = unit(
        vec![global("g", Type::Named("S".to_owned()), None)],
        vec![Method::new("main", Vec::new())],
    );
    unit.types.push(TypeDecl {
        name: "S".to_owned(),
        kind: TypeDeclKind::Struct(vec![("s".to_owned(), Type::Named("S".to_owned()))]),
        span: Span::default(),
    });
    let err = compile_unit(&unit, &mut Session::default()).expect_err("recursive struct");
    assert_eq!(err.to_string(), "type S contains itself");
}

#[test]
fn lowering_is_deterministic() -> anyhow::Result<()> {
    let main = with_locals(
        Method::new(
            "main",
            vec![
                Stmt::select(
                    false,
                    vec![
                        (vec![JoinPattern::Wait(Expr::bool(true))], incr("i")),
                        (vec![JoinPattern::Timeout], Stmt::yield_now()),
                    ],
                ),
                Stmt::try_with(Stmt::raise("E"), vec![(None, Stmt::skip())]),
            ],
        ),
        vec![LocalDecl::new("i", Type::Int)],
    );
    let unit = unit(Vec::new(), vec![main]);
    assert_eq!(compile(&unit)?.machines, compile(&unit)?.machines);
    Ok(())
}

#[test]
fn assertion_failure_stops_the_process() -> anyhow::Result<()> {
    let main = Method::new(
        "main",
        vec![
            Stmt::assert(Expr::bool(false)),
            Stmt::trace("unreachable", Vec::new()),
        ],
    );
    let compiled = compile(&unit(Vec::new(), vec![main]))?;
    let (status, world) = run(&compiled)?;
    assert!(matches!(status, Status::Failed(_)));
    assert!(traces(&world).is_empty());
    Ok(())
}

#[test]
fn async_call_spawns_a_process() -> anyhow::Result<()> {
    let mut worker = Method::new("worker", vec![Stmt::assign(Expr::ident("g"), Expr::ident("n"))]);
    worker.params = vec![Param::new("n", Type::Int)];
    let main = Method::new(
        "main",
        vec![Stmt::async_call(Call::new("worker", vec![Expr::int(4)]))],
    );
    let compiled = compile(&unit(vec![global("g", Type::Int, None)], vec![worker, main]))?;
    let (_, mut world) = run(&compiled)?;
    assert_eq!(world.spawned.len(), 1);
    assert_eq!(world.global(&compiled, "g")?, &Val::Int(0));

    let mut spawned = world.spawned.remove(0);
    spawned.run(&compiled, &mut world, |domain| domain[0].clone())?;
    assert_eq!(world.global(&compiled, "g")?, &Val::Int(4));
    Ok(())
}
