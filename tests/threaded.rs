//! Cross-thread exercise of the synchronized façade.
use std::{
    alloc::{GlobalAlloc, Layout},
    sync::Arc,
    thread,
};

use tlsf_pool::{SyncTlsfResource, SystemSource, ALIGN};

#[test]
fn concurrent_alloc_and_free() {
    let resource =
        Arc::new(SyncTlsfResource::new(1 << 20, SystemSource::default()).unwrap());

    let handles: Vec<_> = (0..4usize)
        .map(|t| {
            let resource = Arc::clone(&resource);
            thread::spawn(move || {
                let layout = Layout::from_size_align(64 + t * 16, 8).unwrap();
                let mut live: Vec<usize> = Vec::new();
                for i in 0..1000usize {
                    unsafe {
                        let ptr = resource.alloc(layout);
                        assert!(!ptr.is_null());
                        ptr.write_bytes((i % 256) as u8, layout.size());
                        live.push(ptr as usize);
                        if live.len() > 8 {
                            resource.dealloc(live.remove(0) as *mut u8, layout);
                        }
                    }
                }
                for ptr in live {
                    unsafe { resource.dealloc(ptr as *mut u8, layout) };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // With everything freed, a request far larger than any single thread's
    // allocations must succeed again, which it can only do once the blocks
    // have coalesced back together.
    let capacity = resource.lock().pool().capacity();
    let layout = Layout::from_size_align(capacity / 2, ALIGN).unwrap();
    unsafe {
        let ptr = resource.alloc(layout);
        assert!(!ptr.is_null());
        resource.dealloc(ptr, layout);
    }
}

#[test]
fn realloc_through_the_global_alloc_interface() {
    let resource = SyncTlsfResource::new(1 << 16, SystemSource::default()).unwrap();

    unsafe {
        let layout = Layout::from_size_align(128, 8).unwrap();
        let ptr = resource.alloc(layout);
        assert!(!ptr.is_null());
        for i in 0..128 {
            ptr.add(i).write(i as u8);
        }

        let grown = resource.realloc(ptr, layout, 4096);
        assert!(!grown.is_null());
        for i in 0..128 {
            assert_eq!(*grown.add(i), i as u8);
        }

        resource.dealloc(grown, Layout::from_size_align(4096, 8).unwrap());
    }
}

#[test]
fn locked_access_composes_operations() {
    let resource = SyncTlsfResource::new(1 << 16, SystemSource::default()).unwrap();

    let mut guard = resource.lock();
    let layout = Layout::from_size_align(512, 8).unwrap();
    let a = guard.allocate(layout).unwrap();
    let b = guard.allocate(layout).unwrap();
    assert_ne!(a, b);
    unsafe {
        guard.deallocate(a, layout);
        guard.deallocate(b, layout);
    }
}
