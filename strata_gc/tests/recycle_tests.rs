//! End-to-end collection behavior through the public heap API.

use strata_gc::{
    AdaptiveBallast, Binding, ContextKind, Feed, Frame, FrameMode, FuncBody, GcConfig, GcState,
    Heap, SeriesId, Tracer, Value,
};
use strata_gc::value::{VarargsSource, VarargsValue};

fn managed_block(heap: &mut Heap, values: &[Value]) -> SeriesId {
    let block = heap.make_array(values.len());
    for &value in values {
        heap.append_value(block, value);
    }
    heap.manage(block);
    block
}

// =============================================================================
// Core properties
// =============================================================================

#[test]
fn test_reachable_graph_survives_and_is_unmarked() {
    let mut heap = Heap::with_defaults();
    let text = heap.make_string("leaf");
    heap.manage(text);
    let inner = managed_block(&mut heap, &[Value::string(text), Value::Integer(7)]);
    let outer = managed_block(&mut heap, &[Value::block(inner), Value::block(inner)]);
    heap.add_global(Value::block(outer));

    assert_eq!(heap.recycle(false), 0);
    for id in [text, inner, outer] {
        assert!(heap.is_series_live(id));
        assert!(!heap.is_marked(id));
    }
    assert_eq!(heap.bytes(text), b"leaf");
    assert_eq!(
        heap.array_values(inner),
        vec![Value::string(text), Value::Integer(7)]
    );
}

#[test]
fn test_unreachable_managed_nodes_are_reclaimed() {
    let mut heap = Heap::with_defaults();
    let garbage = managed_block(&mut heap, &[Value::Integer(1), Value::Integer(2)]);
    let kept = managed_block(&mut heap, &[Value::Integer(3)]);
    heap.add_global(Value::block(kept));

    let freed = heap.recycle(false);
    assert!(freed >= 1);
    assert!(!heap.is_series_live(garbage));
    assert_eq!(heap.array_values(kept), vec![Value::Integer(3)]);

    // The freed unit is first on the free list.
    let reused = heap.make_array(0);
    assert_eq!(reused, garbage);
}

#[test]
fn test_unmanaged_nodes_are_never_touched() {
    let mut heap = Heap::with_defaults();
    let loose = heap.make_array(3);
    heap.append_value(loose, Value::Integer(5));

    for _ in 0..3 {
        assert_eq!(heap.recycle(false), 0);
    }
    assert!(heap.is_series_live(loose));
    assert_eq!(heap.array_values(loose), vec![Value::Integer(5)]);
    heap.free_series(loose);
    assert!(!heap.is_series_live(loose));
}

#[test]
fn test_deep_singleton_chain_marks_without_recursion() {
    const DEPTH: usize = 100_000;

    let mut heap = Heap::new(GcConfig {
        verify_heap: false,
        ..GcConfig::default()
    })
    .unwrap();

    let mut tail = heap.make_array(1);
    heap.manage(tail);
    for _ in 1..DEPTH {
        let link = heap.make_array(1);
        heap.append_value(link, Value::block(tail));
        heap.manage(link);
        tail = link;
    }
    heap.add_global(Value::block(tail));

    assert_eq!(heap.recycle(false), 0);
    assert_eq!(heap.stats().objects_marked(), DEPTH as u64);
    assert_eq!(heap.live_series(), DEPTH);

    heap.clear_globals();
    assert_eq!(heap.recycle(false), DEPTH);
    assert_eq!(heap.live_series(), 0);
}

#[test]
fn test_context_halves_live_and_die_together() {
    let mut heap = Heap::with_defaults();
    let x = heap.intern("x");
    let ctx = heap.make_context(ContextKind::Object, &[x]);
    heap.context_set(ctx, 1, Value::Integer(10));
    let keylist = heap.context_keylist(ctx);
    heap.manage_context(ctx);

    // Reachable only through a bound word.
    let code = managed_block(&mut heap, &[Value::word(x, Binding::Specific(ctx))]);
    heap.add_global(Value::block(code));

    assert_eq!(heap.recycle(false), 0);
    assert!(heap.is_series_live(ctx.varlist()));
    assert!(heap.is_series_live(keylist));
    assert_eq!(heap.context_get(ctx, 1), Some(Value::Integer(10)));

    heap.clear_globals();
    assert_eq!(heap.recycle(false), 3);
    assert!(!heap.is_series_live(ctx.varlist()));
    assert!(!heap.is_series_live(keylist));
}

#[test]
fn test_guards_balance_and_protect() {
    let mut heap = Heap::with_defaults();
    let before = heap.guards().outstanding();

    let block = managed_block(&mut heap, &[Value::Integer(1)]);
    heap.guard_series(block);
    let text = heap.make_string("held");
    heap.manage(text);
    heap.guard_value(Value::string(text));

    assert_eq!(heap.recycle(false), 0);
    assert!(heap.is_series_live(block));
    assert!(heap.is_series_live(text));

    assert_eq!(heap.unguard_value(), Value::string(text));
    heap.unguard_series(block);
    assert_eq!(heap.guards().outstanding(), before);

    assert_eq!(heap.recycle(false), 2);
}

#[test]
fn test_guarded_scope_releases_on_early_return() {
    let mut heap = Heap::with_defaults();
    let block = managed_block(&mut heap, &[]);

    let result: Result<(), &str> = heap.guarded(|heap| {
        heap.guard_series(block);
        heap.guard_value(Value::block(block));
        assert_eq!(heap.recycle(false), 0);
        Err("bail")
    });
    assert!(result.is_err());
    assert_eq!(heap.guards().outstanding(), 0);
}

#[test]
#[should_panic(expected = "guard stack imbalance")]
fn test_unbalanced_guard_fails_shutdown() {
    let mut heap = Heap::new(GcConfig {
        check_guard_balance: true,
        ..GcConfig::default()
    })
    .unwrap();
    let block = managed_block(&mut heap, &[]);
    heap.guard_series(block);
    heap.shutdown();
}

#[test]
fn test_shutdown_sweep_frees_reachable_nodes() {
    let mut heap = Heap::with_defaults();
    let block = managed_block(&mut heap, &[Value::Integer(1)]);
    heap.add_global(Value::block(block));
    let gob = heap.make_gob();
    heap.add_global(Value::Gob(gob));

    assert_eq!(heap.recycle(true), 2);
    assert!(!heap.is_series_live(block));
    assert!(!heap.is_gob_live(gob));
    assert!(heap.pool_stats().iter().all(|stats| stats.used() == 0));
}

#[test]
fn test_second_recycle_frees_nothing() {
    let mut heap = Heap::with_defaults();
    let kept = managed_block(&mut heap, &[Value::Integer(1)]);
    heap.add_global(Value::block(kept));
    managed_block(&mut heap, &[Value::Integer(2)]);

    assert_eq!(heap.recycle(false), 1);
    assert_eq!(heap.recycle(false), 0);
}

#[test]
fn test_example_scenario() {
    let mut heap = Heap::with_defaults();
    let a = managed_block(&mut heap, &[Value::Integer(1)]);
    let b = managed_block(&mut heap, &[Value::Integer(2), Value::Integer(3)]);
    heap.add_global(Value::block(b));

    assert!(heap.recycle(false) >= 1);
    assert!(!heap.is_series_live(a));
    assert_eq!(
        heap.array_values(b),
        vec![Value::Integer(2), Value::Integer(3)]
    );
}

// =============================================================================
// Fatal invariant violations
// =============================================================================

#[test]
#[should_panic(expected = "link to non-managed node")]
fn test_unmanaged_reached_from_root_panics() {
    let mut heap = Heap::with_defaults();
    let loose = heap.make_array(0);
    heap.add_global(Value::block(loose));
    heap.recycle(false);
}

#[test]
#[should_panic(expected = "queued without its keylist")]
fn test_varlist_queued_as_array_panics() {
    let mut heap = Heap::with_defaults();
    let ctx = heap.make_context(ContextKind::Object, &[]);
    heap.manage_context(ctx);
    heap.set_mark_hook(move |tracer: &mut dyn Tracer| tracer.queue_array(ctx.varlist()));
    heap.recycle(false);
}

// =============================================================================
// Trigger and disable
// =============================================================================

#[test]
fn test_latched_request_runs_at_first_safe_point() {
    let mut heap = Heap::with_defaults();
    managed_block(&mut heap, &[]);

    heap.disable_gc();
    heap.disable_gc();
    assert_eq!(heap.recycle(false), 0);
    assert_eq!(heap.gc_state(), GcState::PendingWhileDisabled { depth: 2 });
    heap.enable_gc();
    assert_eq!(heap.safe_point(), None);
    heap.enable_gc();

    assert_eq!(heap.safe_point(), Some(1));
    assert_eq!(heap.stats().recycles(), 1);
}

#[test]
fn test_ballast_exhaustion_requests_a_cycle() {
    let mut heap = Heap::new(GcConfig {
        ballast: 4 * 1024,
        ballast_floor: 4 * 1024,
        ..GcConfig::default()
    })
    .unwrap();

    let mut cycles = 0;
    for n in 0..2_000 {
        managed_block(&mut heap, &[Value::Integer(n), Value::Integer(n)]);
        if heap.safe_point().is_some() {
            cycles += 1;
        }
    }
    assert!(cycles > 0);
    assert!(heap.live_series() < 2_000);
}

#[test]
fn test_adaptive_ballast_grows_then_returns_to_floor() {
    const FLOOR: u64 = 1024;
    let mut heap = Heap::new(GcConfig {
        ballast: FLOOR,
        ballast_floor: FLOOR,
        ..GcConfig::default()
    })
    .unwrap();
    heap.set_ballast_policy(Box::new(AdaptiveBallast::new(FLOOR)));

    let live: Vec<Value> = (0..64)
        .map(|n| Value::block(managed_block(&mut heap, &[Value::Integer(n)])))
        .collect();
    let holder = managed_block(&mut heap, &live);
    heap.add_global(Value::block(holder));

    heap.recycle(false);
    let grown = heap.collector().ballast().budget();
    assert!(grown > FLOOR);

    heap.clear_globals();
    heap.recycle(false);
    heap.recycle(false);
    assert_eq!(heap.collector().ballast().budget(), FLOOR);
}

// =============================================================================
// Other roots
// =============================================================================

#[test]
fn test_variadic_feed_is_reified_and_survives() {
    let mut heap = Heap::with_defaults();
    let payload = managed_block(&mut heap, &[Value::Integer(42)]);
    let id = heap.push_frame(Frame::over_values(
        vec![Value::block(payload), Value::Integer(1)].into_iter(),
    ));

    assert_eq!(heap.recycle(false), 0);
    let Some(Feed::Array { array, .. }) = heap.frame(id).map(|frame| &frame.feed) else {
        panic!("feed was not reified");
    };
    let array = *array;
    assert_eq!(
        heap.array_values(array),
        vec![Value::block(payload), Value::Integer(1)]
    );
    assert!(heap.is_series_live(payload));

    heap.pop_frame();
    assert_eq!(heap.recycle(false), 2);
}

#[test]
fn test_guard_array_only_frame_protects_feed() {
    let mut heap = Heap::with_defaults();
    let source = managed_block(&mut heap, &[Value::Integer(1)]);
    let out = managed_block(&mut heap, &[]);

    let mut frame = Frame::over_array(source, 0);
    frame.mode = FrameMode::GuardArrayOnly;
    frame.out.set(Value::block(out));
    heap.push_frame(frame);

    assert_eq!(heap.recycle(false), 1);
    assert!(heap.is_series_live(source));
    assert!(!heap.is_series_live(out));
}

#[test]
fn test_promoted_frame_keeps_paramlist_but_not_unmanaged_varlist() {
    let mut heap = Heap::with_defaults();
    let x = heap.intern("x");
    let func = heap.make_function(FuncBody::Native(3), None, &[x]);
    heap.manage(func.paramlist);

    let arg = managed_block(&mut heap, &[]);
    let mut frame = Frame::default();
    frame.func = Some(func);
    frame.args.push(Value::block(arg).into());
    let id = heap.push_frame(frame);
    let Some(context) = heap.promote_frame(id) else {
        panic!("frame was not promoted");
    };

    assert_eq!(heap.recycle(false), 0);
    assert!(heap.is_series_live(func.paramlist));
    assert!(heap.is_series_live(arg));
    assert!(!heap.is_managed(context.varlist()));

    // Popping frees the varlist that never escaped.
    let baseline = heap.live_series() - 1;
    heap.pop_frame();
    assert!(!heap.is_series_live(context.varlist()));
    assert_eq!(heap.live_series(), baseline);
    assert_eq!(heap.recycle(false), 2);
}

#[test]
fn test_promoted_frames_do_not_leak() {
    let mut heap = Heap::with_defaults();
    let func = heap.make_function(FuncBody::Native(1), None, &[]);
    heap.manage(func.paramlist);
    heap.guard_series(func.paramlist);
    let baseline = heap.live_series();

    for _ in 0..100 {
        let mut frame = Frame::default();
        frame.func = Some(func);
        let id = heap.push_frame(frame);
        assert!(heap.promote_frame(id).is_some());
        heap.pop_frame();
    }
    assert_eq!(heap.recycle(false), 0);
    assert_eq!(heap.live_series(), baseline);

    heap.unguard_series(func.paramlist);
    assert_eq!(heap.shutdown(), 1);
    assert_eq!(heap.live_series(), 0);
}

#[test]
fn test_unmanaged_scratch_in_frame_slots_is_skipped() {
    let mut heap = Heap::with_defaults();
    let source = managed_block(&mut heap, &[Value::Integer(1)]);
    let scratch = heap.make_array(1);
    let held = managed_block(&mut heap, &[]);

    let mut frame = Frame::over_array(source, 0);
    frame.value = Some(Value::block(scratch).into());
    frame.param = Some(Value::block(scratch).into());
    frame.refine = Some(Value::block(held).into());
    heap.push_frame(frame);

    assert_eq!(heap.recycle(false), 0);
    assert!(heap.is_series_live(source));
    assert!(heap.is_series_live(scratch));
    assert!(heap.is_series_live(held));

    heap.pop_frame();
    heap.free_series(scratch);
    assert_eq!(heap.recycle(false), 2);
}

#[test]
fn test_varargs_subfeed_may_be_a_context() {
    let mut heap = Heap::with_defaults();
    let x = heap.intern("x");
    let ctx = heap.make_context(ContextKind::Object, &[x]);
    let keylist = heap.context_keylist(ctx);
    heap.manage_context(ctx);
    let block = managed_block(&mut heap, &[Value::Integer(1)]);

    heap.add_global(Value::Varargs(VarargsValue {
        source: VarargsSource::Array {
            array: block,
            index: 0,
        },
        subfeed: Some(ctx.varlist()),
    }));

    assert_eq!(heap.recycle(false), 0);
    assert!(heap.is_series_live(ctx.varlist()));
    assert!(heap.is_series_live(keylist));

    heap.clear_globals();
    assert_eq!(heap.recycle(false), 3);
}

#[test]
fn test_root_pairing_keeps_value_until_freed() {
    let mut heap = Heap::with_defaults();
    let text = heap.make_string("anchored");
    heap.manage(text);
    let block = managed_block(&mut heap, &[Value::string(text)]);
    let pairing = heap.make_root_pairing(Value::block(block));

    assert_eq!(heap.recycle(false), 0);
    assert_eq!(heap.pairing_value(pairing), Value::block(block));

    heap.free_pairing(pairing);
    assert_eq!(heap.recycle(false), 2);
    assert!(!heap.is_series_live(text));
}

#[test]
fn test_pending_request_keeps_port() {
    let mut heap = Heap::with_defaults();
    let port = heap.make_context(ContextKind::Port, &[]);
    heap.manage_context(port);

    let devices = heap.device_handle();
    let request = {
        let mut table = devices.lock();
        let net = table.add_device("network");
        table.queue_request(net, 1, Some(port))
    };
    let Some(request) = request else {
        panic!("device was not registered");
    };

    assert_eq!(heap.recycle(false), 0);
    assert!(heap.is_series_live(port.varlist()));

    let done = devices.lock().complete_request(request);
    assert!(done.is_some());
    assert_eq!(heap.recycle(false), 2);
    assert_eq!(devices.lock().pending_count(), 0);
}

#[test]
fn test_mark_hook_reports_host_roots() {
    let mut heap = Heap::with_defaults();
    let held = managed_block(&mut heap, &[Value::Integer(8)]);
    heap.set_mark_hook(move |tracer: &mut dyn Tracer| tracer.queue_array(held));

    assert_eq!(heap.recycle(false), 0);
    assert!(heap.is_series_live(held));

    heap.clear_mark_hook();
    assert_eq!(heap.recycle(false), 1);
}

#[test]
fn test_gob_tree_lives_through_one_member() {
    let mut heap = Heap::with_defaults();
    let window = heap.make_gob();
    let button = heap.make_gob();
    let label = heap.make_gob();
    heap.gob_insert(window, button);
    heap.gob_insert(button, label);
    let stray = heap.make_gob();

    // Reaching the leaf walks up to the root and back down.
    heap.add_global(Value::Gob(label));
    assert_eq!(heap.recycle(false), 1);
    assert!(!heap.is_gob_live(stray));
    for gob in [window, button, label] {
        assert!(heap.is_gob_live(gob));
    }
    assert_eq!(heap.gob_children(window), vec![button]);
}

#[test]
fn test_struct_fields_are_marked_with_data() {
    let mut heap = Heap::with_defaults();
    let spec = managed_block(&mut heap, &[]);
    let inner_spec = managed_block(&mut heap, &[]);

    let mut leaf = strata_gc::StructField::primitive(None, 3, 0, 4);
    leaf.spec = Some(inner_spec);
    let nested_fields = heap.make_field_series(&[leaf]);
    let value = heap.make_struct(
        spec,
        &[strata_gc::StructField::nested(None, nested_fields, 0, 4)],
        4,
    );
    heap.add_global(Value::Struct(value));

    assert_eq!(heap.recycle(false), 0);
    for id in [spec, inner_spec, nested_fields, value.fields, value.data] {
        assert!(heap.is_series_live(id));
    }

    heap.clear_globals();
    assert_eq!(heap.recycle(false), 5);
}

// =============================================================================
// Diagnostics
// =============================================================================

#[test]
fn test_dump_to_file() {
    let mut heap = Heap::with_defaults();
    let key = heap.intern("title");
    let ctx = heap.make_context(ContextKind::Object, &[key]);
    let text = heap.make_string("hello");
    heap.manage(text);
    heap.context_set(ctx, 1, Value::string(text));
    heap.manage_context(ctx);
    heap.set_root_context(Some(ctx));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mem.csv");
    let lines = heap.dump_memory_usage_to(&path).unwrap();
    let dump = std::fs::read_to_string(&path).unwrap();

    assert!(lines >= 3);
    assert!(dump.starts_with("# addr,parent,kind,size,edge,name\n"));
    assert!(dump.contains("#frames\n"));
    assert!(dump.contains(",keylist,2,<keylist>,"));
    assert!(dump.contains(",varlist,2,<root-context>,"));
    assert!(dump.contains(",string,5,(null),title"));
    // The dump ran a real cycle.
    assert_eq!(heap.stats().recycles(), 1);
}
