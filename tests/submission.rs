mod common;

use common::Harness;
use kage::*;

#[test]
fn sequence_numbers_increase_even_for_fence_only_submits() {
    let h = Harness::new();
    let queue = h.tracker.store().queues.get(h.gfx_queue).unwrap();

    let cb = h.make_executable_cb(false);
    let f1 = h.make_fence();
    let f2 = h.make_fence();

    h.submit(
        h.gfx_queue,
        vec![SubmitBatch {
            command_buffers: vec![cb],
            ..Default::default()
        }],
        Handle::null(),
    );
    assert_eq!(queue.last_seq(), 1);

    // Zero-batch, fence-only submission still allocates a sequence number.
    h.submit(h.gfx_queue, vec![], f1);
    assert_eq!(queue.last_seq(), 2);

    h.submit(h.gfx_queue, vec![], f2);
    assert_eq!(queue.last_seq(), 3);

    // Other queues run their own counters.
    let compute = h.tracker.store().queues.get(h.compute_queue).unwrap();
    assert_eq!(compute.last_seq(), 0);
}

#[test]
fn fence_wait_retires_and_resets_resettable_buffer() {
    let h = Harness::new();
    let cb = h.make_executable_cb(false);
    let fence = h.make_fence();

    h.submit(
        h.gfx_queue,
        vec![SubmitBatch {
            command_buffers: vec![cb],
            ..Default::default()
        }],
        fence,
    );
    let cb_state = h.tracker.store().command_buffers.get(cb).unwrap();
    assert_eq!(cb_state.state(), CbState::Pending);

    h.wait_fence(fence);
    assert_eq!(cb_state.state(), CbState::Executable);
    assert!(h.tracker.store().fences.get(fence).unwrap().is_signaled());
}

#[test]
fn one_time_submit_buffer_ends_invalid() {
    let h = Harness::new();
    let cb = h.make_executable_cb(true);
    let fence = h.make_fence();

    h.submit(
        h.gfx_queue,
        vec![SubmitBatch {
            command_buffers: vec![cb],
            ..Default::default()
        }],
        fence,
    );
    h.wait_fence(fence);

    let cb_state = h.tracker.store().command_buffers.get(cb).unwrap();
    assert_eq!(cb_state.state(), CbState::Invalid);
}

#[test]
fn submit_failure_mutates_nothing() {
    let h = Harness::new();
    let cb = h.make_executable_cb(false);
    let queue = h.tracker.store().queues.get(h.gfx_queue).unwrap();

    h.tracker
        .post_call(
            &ApiCall::QueueSubmit {
                queue: h.gfx_queue,
                batches: vec![SubmitBatch {
                    command_buffers: vec![cb],
                    ..Default::default()
                }],
                fence: Handle::null(),
            },
            &CallRecord::err(ResultCode::ErrorDeviceLost),
        )
        .unwrap();

    assert_eq!(queue.last_seq(), 0);
    let cb_state = h.tracker.store().command_buffers.get(cb).unwrap();
    assert_eq!(cb_state.state(), CbState::Executable);
}

#[test]
fn semaphore_chain_across_queues_retires_transitively() {
    let h = Harness::new();
    let sem = h.make_semaphore(SemaphoreKind::Binary);
    let cb_a = h.make_executable_cb(false);
    let cb_b = h.make_executable_cb(false);
    let fence = h.make_fence();

    // Graphics signals; compute waits, carrying the only fence.
    h.submit(
        h.gfx_queue,
        vec![SubmitBatch {
            command_buffers: vec![cb_a],
            signals: vec![SemaphoreOp {
                semaphore: sem,
                value: 0,
            }],
            ..Default::default()
        }],
        Handle::null(),
    );
    h.submit(
        h.compute_queue,
        vec![SubmitBatch {
            command_buffers: vec![cb_b],
            waits: vec![SemaphoreOp {
                semaphore: sem,
                value: 0,
            }],
            ..Default::default()
        }],
        fence,
    );

    h.wait_fence(fence);

    // Waiting on the compute fence retired the graphics submission too.
    let gfx = h.tracker.store().queues.get(h.gfx_queue).unwrap();
    let compute = h.tracker.store().queues.get(h.compute_queue).unwrap();
    assert_eq!(gfx.retired_seq(), 1);
    assert_eq!(compute.retired_seq(), 1);
    assert!(gfx.pending_submissions().is_empty());

    let cb_state = h.tracker.store().command_buffers.get(cb_a).unwrap();
    assert_eq!(cb_state.state(), CbState::Executable);
}

#[test]
fn timeline_semaphore_host_wait_and_signal() {
    let h = Harness::new();
    let sem = h.make_semaphore(SemaphoreKind::Timeline);
    let cb = h.make_executable_cb(false);

    h.submit(
        h.gfx_queue,
        vec![SubmitBatch {
            command_buffers: vec![cb],
            signals: vec![SemaphoreOp {
                semaphore: sem,
                value: 5,
            }],
            ..Default::default()
        }],
        Handle::null(),
    );

    h.tracker
        .post_call(
            &ApiCall::WaitSemaphores {
                waits: vec![SemaphoreOp {
                    semaphore: sem,
                    value: 5,
                }],
                timeout_ns: u64::MAX,
            },
            &CallRecord::ok(),
        )
        .unwrap();

    let sem_state = h.tracker.store().semaphores.get(sem).unwrap();
    assert_eq!(sem_state.completed_payload(), 5);

    // A host signal advances the payload directly.
    h.tracker
        .post_call(
            &ApiCall::SignalSemaphore {
                semaphore: sem,
                value: 9,
            },
            &CallRecord::ok(),
        )
        .unwrap();
    assert_eq!(sem_state.completed_payload(), 9);
}

#[test]
fn queue_wait_idle_drains_the_queue() {
    let h = Harness::new();
    let cbs: Vec<Handle<CommandBuffer>> = (0..3).map(|_| h.make_executable_cb(false)).collect();
    for cb in &cbs {
        h.submit(
            h.gfx_queue,
            vec![SubmitBatch {
                command_buffers: vec![*cb],
                ..Default::default()
            }],
            Handle::null(),
        );
    }
    h.tracker
        .post_call(
            &ApiCall::QueueWaitIdle {
                queue: h.gfx_queue,
            },
            &CallRecord::ok(),
        )
        .unwrap();

    let queue = h.tracker.store().queues.get(h.gfx_queue).unwrap();
    assert_eq!(queue.retired_seq(), 3);
    assert!(queue.pending_submissions().is_empty());
}

#[test]
fn device_wait_idle_drains_every_queue() {
    let h = Harness::new();
    let cb_a = h.make_executable_cb(false);
    let cb_b = h.make_executable_cb(false);
    h.submit(
        h.gfx_queue,
        vec![SubmitBatch {
            command_buffers: vec![cb_a],
            ..Default::default()
        }],
        Handle::null(),
    );
    h.submit(
        h.compute_queue,
        vec![SubmitBatch {
            command_buffers: vec![cb_b],
            ..Default::default()
        }],
        Handle::null(),
    );

    h.tracker
        .post_call(
            &ApiCall::DeviceWaitIdle { device: h.device },
            &CallRecord::ok(),
        )
        .unwrap();

    for queue in [h.gfx_queue, h.compute_queue] {
        let q = h.tracker.store().queues.get(queue).unwrap();
        assert!(q.pending_submissions().is_empty());
    }
}

#[test]
fn external_fence_requests_eager_notify() {
    let h = Harness::new();
    let fence: Handle<Fence> = h.create(ApiCall::CreateFence {
        info: FenceInfo {
            debug_name: String::new(),
            signaled: false,
            external: true,
        },
    });
    let summary = h.tracker.post_queue_submit(
        h.gfx_queue,
        &[],
        fence,
        &CallRecord::ok(),
    );
    assert!(summary.eager_notify);
    assert_eq!(summary.seqs, vec![1]);
}

#[test]
fn retired_submission_applies_event_and_query_effects() {
    let h = Harness::new();
    let pool: Handle<CommandPool> = h.create(ApiCall::CreateCommandPool {
        info: CommandPoolInfo::default(),
    });
    let cb: Handle<CommandBuffer> = h.create(ApiCall::AllocateCommandBuffers {
        pool,
        level: CommandBufferLevel::Primary,
    });
    let event: Handle<Event> = h.create(ApiCall::CreateEvent {
        info: EventInfo::default(),
    });
    let query_pool: Handle<QueryPool> = h.create(ApiCall::CreateQueryPool {
        info: QueryPoolInfo {
            debug_name: String::new(),
            ty: QueryType::Occlusion,
            count: 4,
        },
    });

    let record = |cmd| {
        h.tracker
            .post_call(
                &ApiCall::RecordCommand {
                    buffer: cb,
                    command: cmd,
                },
                &CallRecord::ok(),
            )
            .unwrap();
    };
    h.tracker
        .post_call(
            &ApiCall::BeginCommandBuffer {
                buffer: cb,
                one_time: false,
            },
            &CallRecord::ok(),
        )
        .unwrap();
    record(RecordedCommand::BeginQuery {
        pool: query_pool,
        query: 0,
    });
    record(RecordedCommand::Draw {
        vertex_count: 3,
        instance_count: 1,
        first_vertex: 0,
        first_instance: 0,
    });
    record(RecordedCommand::EndQuery {
        pool: query_pool,
        query: 0,
    });
    record(RecordedCommand::SetEvent { event });
    h.tracker
        .post_call(&ApiCall::EndCommandBuffer { buffer: cb }, &CallRecord::ok())
        .unwrap();

    let fence = h.make_fence();
    h.submit(
        h.gfx_queue,
        vec![SubmitBatch {
            command_buffers: vec![cb],
            ..Default::default()
        }],
        fence,
    );

    // Nothing applies until the submission retires.
    let ev = h.tracker.store().events.get(event).unwrap();
    let qp = h.tracker.store().query_pools.get(query_pool).unwrap();
    assert!(!ev.is_signaled());

    h.wait_fence(fence);
    assert!(ev.is_signaled());
    assert_eq!(qp.query_status(0), QueryStatus::Available);
    assert_eq!(qp.query_status(1), QueryStatus::Unavailable);
}

#[test]
fn labels_replay_onto_the_queue() {
    let h = Harness::new();
    let pool: Handle<CommandPool> = h.create(ApiCall::CreateCommandPool {
        info: CommandPoolInfo::default(),
    });
    let cb: Handle<CommandBuffer> = h.create(ApiCall::AllocateCommandBuffers {
        pool,
        level: CommandBufferLevel::Primary,
    });
    h.tracker
        .post_call(
            &ApiCall::BeginCommandBuffer {
                buffer: cb,
                one_time: false,
            },
            &CallRecord::ok(),
        )
        .unwrap();
    for cmd in [
        RecordedCommand::BeginLabel {
            label: "frame".into(),
        },
        RecordedCommand::BeginLabel {
            label: "shadow pass".into(),
        },
        RecordedCommand::EndLabel,
    ] {
        h.tracker
            .post_call(
                &ApiCall::RecordCommand {
                    buffer: cb,
                    command: cmd,
                },
                &CallRecord::ok(),
            )
            .unwrap();
    }
    h.tracker
        .post_call(&ApiCall::EndCommandBuffer { buffer: cb }, &CallRecord::ok())
        .unwrap();
    h.submit(
        h.gfx_queue,
        vec![SubmitBatch {
            command_buffers: vec![cb],
            ..Default::default()
        }],
        Handle::null(),
    );

    let queue = h.tracker.store().queues.get(h.gfx_queue).unwrap();
    assert_eq!(queue.label_stack(), vec!["frame".to_string()]);
}

#[test]
fn dynamic_state_trashing_attributes_the_bind() {
    let h = Harness::new();
    let layout: Handle<PipelineLayout> = h.create(ApiCall::CreatePipelineLayout {
        info: PipelineLayoutInfo::default(),
    });
    // Viewport stays dynamic; scissor is baked static.
    let pipeline: Handle<Pipeline> = h.create(ApiCall::CreateGraphicsPipeline {
        info: GraphicsPipelineInfo {
            debug_name: "static-scissor".into(),
            layout,
            dynamic: DynamicStateMask::VIEWPORT,
        },
    });
    let pool: Handle<CommandPool> = h.create(ApiCall::CreateCommandPool {
        info: CommandPoolInfo::default(),
    });
    let cb: Handle<CommandBuffer> = h.create(ApiCall::AllocateCommandBuffers {
        pool,
        level: CommandBufferLevel::Primary,
    });
    h.tracker
        .post_call(
            &ApiCall::BeginCommandBuffer {
                buffer: cb,
                one_time: false,
            },
            &CallRecord::ok(),
        )
        .unwrap();
    for cmd in [
        RecordedCommand::SetViewport(Viewport::default()),
        RecordedCommand::SetScissor(Rect2D {
            x: 0,
            y: 0,
            w: 64,
            h: 64,
        }),
        RecordedCommand::BindPipeline {
            bind_point: PipelineBindPoint::Graphics,
            pipeline,
        },
    ] {
        h.tracker
            .post_call(
                &ApiCall::RecordCommand {
                    buffer: cb,
                    command: cmd,
                },
                &CallRecord::ok(),
            )
            .unwrap();
    }

    let cb_state = h.tracker.store().command_buffers.get(cb).unwrap();
    // Viewport survived the bind, scissor did not, and the trashing bind is
    // attributable.
    assert!(cb_state.dynamic_valid().contains(DynamicStateMask::VIEWPORT));
    assert!(!cb_state.dynamic_valid().contains(DynamicStateMask::SCISSOR));
    assert_eq!(cb_state.trashed_by(DynamicStateMask::SCISSOR), Some(pipeline));
}

#[test]
fn child_resources_keep_destroyed_buffer_alive() {
    let h = Harness::new();
    let pool: Handle<CommandPool> = h.create(ApiCall::CreateCommandPool {
        info: CommandPoolInfo::default(),
    });
    let cb: Handle<CommandBuffer> = h.create(ApiCall::AllocateCommandBuffers {
        pool,
        level: CommandBufferLevel::Primary,
    });
    let src = h.make_buffer(256);
    let dst = h.make_buffer(256);

    h.tracker
        .post_call(
            &ApiCall::BeginCommandBuffer {
                buffer: cb,
                one_time: false,
            },
            &CallRecord::ok(),
        )
        .unwrap();
    h.tracker
        .post_call(
            &ApiCall::RecordCommand {
                buffer: cb,
                command: RecordedCommand::CopyBuffer {
                    src,
                    dst,
                    src_offset: 0,
                    dst_offset: 0,
                    byte_size: 256,
                },
            },
            &CallRecord::ok(),
        )
        .unwrap();
    h.tracker
        .post_call(&ApiCall::EndCommandBuffer { buffer: cb }, &CallRecord::ok())
        .unwrap();

    h.tracker.pre_call(&ApiCall::DestroyBuffer { buffer: src });
    assert!(h.tracker.store().buffers.get(src).is_none());

    let cb_state = h.tracker.store().command_buffers.get(cb).unwrap();
    let children = cb_state.children();
    assert!(children.iter().any(|c| c.raw_handle() == src.raw));
}

#[test]
fn command_pool_destroy_invalidates_buffers() {
    let h = Harness::new();
    let pool: Handle<CommandPool> = h.create(ApiCall::CreateCommandPool {
        info: CommandPoolInfo::default(),
    });
    let cb: Handle<CommandBuffer> = h.create(ApiCall::AllocateCommandBuffers {
        pool,
        level: CommandBufferLevel::Primary,
    });
    let cb_state = h.tracker.store().command_buffers.get(cb).unwrap();

    h.tracker.pre_call(&ApiCall::DestroyCommandPool { pool });
    assert!(h.tracker.store().command_buffers.get(cb).is_none());
    assert_eq!(cb_state.state(), CbState::Invalid);
}
