mod common;

use common::Harness;
use kage::*;

fn make_layout(h: &Harness, bindings: Vec<DescriptorBinding>) -> Handle<DescriptorSetLayout> {
    h.create(ApiCall::CreateDescriptorSetLayout {
        info: DescriptorSetLayoutInfo {
            debug_name: "layout".into(),
            bindings,
        },
    })
}

fn make_pool(h: &Harness, allow_free: bool) -> Handle<DescriptorPool> {
    h.create(ApiCall::CreateDescriptorPool {
        info: DescriptorPoolInfo {
            debug_name: "pool".into(),
            max_sets: 8,
            allow_free,
            sizes: vec![(DescriptorType::StorageBuffer, 64)],
        },
    })
}

fn alloc_set(
    h: &Harness,
    pool: Handle<DescriptorPool>,
    layout: Handle<DescriptorSetLayout>,
) -> Handle<DescriptorSet> {
    h.create(ApiCall::AllocateDescriptorSets {
        pool,
        layouts: vec![layout],
    })
}

fn storage_binding(binding: u32, count: u32) -> DescriptorBinding {
    DescriptorBinding {
        binding,
        ty: DescriptorType::StorageBuffer,
        count,
    }
}

fn write_buffer(
    h: &Harness,
    set: Handle<DescriptorSet>,
    binding: u32,
    element: u32,
    buffers: &[Handle<Buffer>],
) {
    h.tracker
        .post_call(
            &ApiCall::UpdateDescriptorSets {
                writes: vec![WriteDescriptorSet {
                    set,
                    binding,
                    array_element: element,
                    ty: DescriptorType::StorageBuffer,
                    resources: buffers
                        .iter()
                        .map(|b| DescriptorResource::Buffer {
                            buffer: *b,
                            offset: 0,
                            range: 64,
                        })
                        .collect(),
                }],
                copies: vec![],
            },
            &CallRecord::ok(),
        )
        .unwrap();
}

#[test]
fn write_update_fills_elements() {
    let h = Harness::new();
    let layout = make_layout(&h, vec![storage_binding(0, 4)]);
    let pool = make_pool(&h, false);
    let set = alloc_set(&h, pool, layout);
    let buffer = h.make_buffer(64);

    write_buffer(&h, set, 0, 1, &[buffer]);

    let set_state = h.tracker.store().descriptor_sets.get(set).unwrap();
    assert!(set_state.bound(0, 0).is_none());
    assert!(matches!(
        set_state.bound(0, 1),
        Some(BoundDescriptor::Buffer { .. })
    ));
}

#[test]
fn write_update_rolls_over_into_next_binding() {
    let h = Harness::new();
    let layout = make_layout(&h, vec![storage_binding(0, 2), storage_binding(1, 2)]);
    let pool = make_pool(&h, false);
    let set = alloc_set(&h, pool, layout);
    let buffers: Vec<Handle<Buffer>> = (0..3).map(|_| h.make_buffer(64)).collect();

    // Three descriptors starting at (0, 1): fills 0[1], then 1[0] and 1[1].
    write_buffer(&h, set, 0, 1, &buffers);

    let set_state = h.tracker.store().descriptor_sets.get(set).unwrap();
    assert!(set_state.bound(0, 1).is_some());
    assert!(set_state.bound(1, 0).is_some());
    assert!(set_state.bound(1, 1).is_some());
}

#[test]
fn copy_update_duplicates_references() {
    let h = Harness::new();
    let layout = make_layout(&h, vec![storage_binding(0, 1)]);
    let pool = make_pool(&h, false);
    let set_a = alloc_set(&h, pool, layout);
    let set_b = alloc_set(&h, pool, layout);
    let buffer = h.make_buffer(64);

    write_buffer(&h, set_a, 0, 0, &[buffer]);
    h.tracker
        .post_call(
            &ApiCall::UpdateDescriptorSets {
                writes: vec![],
                copies: vec![CopyDescriptorSet {
                    src_set: set_a,
                    src_binding: 0,
                    src_array_element: 0,
                    dst_set: set_b,
                    dst_binding: 0,
                    dst_array_element: 0,
                    count: 1,
                }],
            },
            &CallRecord::ok(),
        )
        .unwrap();

    // Destroy the original resource; B's copy keeps the state alive.
    h.tracker.pre_call(&ApiCall::DestroyBuffer { buffer });
    assert!(h.tracker.store().buffers.get(buffer).is_none());

    let b_state = h.tracker.store().descriptor_sets.get(set_b).unwrap();
    match b_state.bound(0, 0) {
        Some(BoundDescriptor::Buffer { buffer: held, .. }) => {
            assert_eq!(held.info.byte_size, 64);
        }
        other => panic!("expected a buffer descriptor, got none: {}", other.is_some()),
    }
}

#[test]
fn pool_reset_invalidates_all_sets() {
    let h = Harness::new();
    let layout = make_layout(&h, vec![storage_binding(0, 1)]);
    let pool = make_pool(&h, false);
    let set_a = alloc_set(&h, pool, layout);
    let set_b = alloc_set(&h, pool, layout);

    h.tracker
        .post_call(&ApiCall::ResetDescriptorPool { pool }, &CallRecord::ok())
        .unwrap();
    assert!(h.tracker.store().descriptor_sets.get(set_a).is_none());
    assert!(h.tracker.store().descriptor_sets.get(set_b).is_none());
}

#[test]
fn explicit_free_respects_pool_flag() {
    let h = Harness::new();
    let layout = make_layout(&h, vec![storage_binding(0, 1)]);

    let bulk_pool = make_pool(&h, false);
    let stuck = alloc_set(&h, bulk_pool, layout);
    h.tracker.pre_call(&ApiCall::FreeDescriptorSets {
        pool: bulk_pool,
        sets: vec![stuck],
    });
    // Bulk-lifetime pool: the free is ignored.
    assert!(h.tracker.store().descriptor_sets.get(stuck).is_some());

    let free_pool = make_pool(&h, true);
    let freed = alloc_set(&h, free_pool, layout);
    h.tracker.pre_call(&ApiCall::FreeDescriptorSets {
        pool: free_pool,
        sets: vec![freed],
    });
    assert!(h.tracker.store().descriptor_sets.get(freed).is_none());
}

#[test]
fn template_update_replays_entries() {
    let h = Harness::new();
    let layout = make_layout(&h, vec![storage_binding(0, 1), storage_binding(1, 1)]);
    let pool = make_pool(&h, false);
    let set = alloc_set(&h, pool, layout);
    let template: Handle<UpdateTemplate> = h.create(ApiCall::CreateUpdateTemplate {
        info: UpdateTemplateInfo {
            debug_name: "tmpl".into(),
            entries: vec![
                UpdateTemplateEntry {
                    binding: 0,
                    array_element: 0,
                    count: 1,
                    ty: DescriptorType::StorageBuffer,
                },
                UpdateTemplateEntry {
                    binding: 1,
                    array_element: 0,
                    count: 1,
                    ty: DescriptorType::StorageBuffer,
                },
            ],
        },
    });
    let a = h.make_buffer(64);
    let b = h.make_buffer(64);
    h.tracker
        .post_call(
            &ApiCall::UpdateWithTemplate {
                set,
                template,
                resources: vec![
                    DescriptorResource::Buffer {
                        buffer: a,
                        offset: 0,
                        range: 64,
                    },
                    DescriptorResource::Buffer {
                        buffer: b,
                        offset: 0,
                        range: 64,
                    },
                ],
            },
            &CallRecord::ok(),
        )
        .unwrap();

    let set_state = h.tracker.store().descriptor_sets.get(set).unwrap();
    assert!(set_state.bound(0, 0).is_some());
    assert!(set_state.bound(1, 0).is_some());
}

#[test]
fn pool_destroy_takes_sets_with_it() {
    let h = Harness::new();
    let layout = make_layout(&h, vec![storage_binding(0, 1)]);
    let pool = make_pool(&h, false);
    let set = alloc_set(&h, pool, layout);

    h.tracker.pre_call(&ApiCall::DestroyDescriptorPool { pool });
    assert!(h.tracker.store().descriptor_pools.get(pool).is_none());
    assert!(h.tracker.store().descriptor_sets.get(set).is_none());
}
