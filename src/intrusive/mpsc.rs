//! Lock-free, intrusive multi-producer/single-consumer queue.
//!
//! This backs the reactor's completion queue: poll backends and
//! immediate-completion call sites are producers, the run loop is the sole
//! consumer. A single atomic pointer holds the producer-side stack; when the
//! consumer-private list runs dry it atomically detaches that stack and
//! reverses it back into push order.
//!
//! `push` is a single `AtomicPtr` exchange (wait-free). `try_pop` is
//! lock-free and must only ever be called from one thread at a time; it
//! amortizes the detach-and-reverse over a whole batch, so the common case
//! (draining a non-empty consumer-local list) touches no atomics at all.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use super::Hook;

pub struct Mpsc<T: Hook> {
    producers: AtomicPtr<T>,
    consumer: std::cell::Cell<*mut T>,
}

// SAFETY: `producers` is a proper lock-free MPSC handoff; `consumer` is only
// ever touched by whichever single thread calls `try_pop`/`pop`, which is a
// contract the type's docs establish, not something the compiler can check.
unsafe impl<T: Hook + Send> Send for Mpsc<T> {}
unsafe impl<T: Hook + Send> Sync for Mpsc<T> {}

impl<T: Hook> Mpsc<T> {
    pub const fn new() -> Self {
        Mpsc {
            producers: AtomicPtr::new(ptr::null_mut()),
            consumer: std::cell::Cell::new(ptr::null_mut()),
        }
    }

    /// Push `node`. Wait-free: a single atomic exchange.
    ///
    /// # Safety
    /// `node` must be a valid, non-null pointer, not currently linked into
    /// any other container, whose storage outlives its time in this queue.
    pub unsafe fn push(&self, node: *mut T) {
        debug_assert!(!node.is_null());
        (*node).link().mark_linked();
        let mut head = self.producers.load(Ordering::Relaxed);
        loop {
            (*node).link().set_next(head);
            match self.producers.compare_exchange_weak(
                head,
                node,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.get().is_null() && self.producers.load(Ordering::Relaxed).is_null()
    }

    /// Pop the oldest-pushed node observable right now, or null. Must only
    /// be called from the single consumer thread.
    pub fn try_pop(&self) -> *mut T {
        if self.consumer.get().is_null() {
            let stack = self.producers.swap(ptr::null_mut(), Ordering::Acquire);
            self.consumer.set(reverse(stack));
        }

        let node = self.consumer.get();
        if node.is_null() {
            return ptr::null_mut();
        }
        unsafe {
            self.consumer.set((*node).link().next());
            (*node).link().mark_unlinked();
        }
        node
    }
}

impl<T: Hook> Default for Mpsc<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reverse a singly-linked chain of nodes in place, returning the new head.
/// The producer side links newest-first (a Treiber stack); reversing once,
/// on detach, turns it back into push order for the consumer.
fn reverse<T: Hook>(mut head: *mut T) -> *mut T {
    let mut prev: *mut T = ptr::null_mut();
    while !head.is_null() {
        unsafe {
            let next = (*head).link().next();
            (*head).link().set_next(prev);
            prev = head;
            head = next;
        }
    }
    prev
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intrusive::Link;
    use std::sync::Arc;
    use std::thread;

    struct Node {
        link: Link<Node>,
        producer: u32,
        tag: u32,
    }

    unsafe impl Hook for Node {
        fn link(&self) -> &Link<Node> {
            &self.link
        }
    }

    #[test]
    fn single_thread_fifo_order() {
        let q = Mpsc::<Node>::new();
        assert!(q.is_empty());
        assert!(q.try_pop().is_null());

        let mut a = Node { link: Link::new(), producer: 0, tag: 1 };
        let mut b = Node { link: Link::new(), producer: 0, tag: 2 };
        let mut c = Node { link: Link::new(), producer: 0, tag: 3 };
        unsafe {
            q.push(&mut a);
            q.push(&mut b);
            q.push(&mut c);
        }
        unsafe {
            assert_eq!((*q.try_pop()).tag, 1);
            assert_eq!((*q.try_pop()).tag, 2);
            assert_eq!((*q.try_pop()).tag, 3);
        }
        assert!(q.try_pop().is_null());
    }

    #[test]
    fn interleaved_push_pop() {
        let q = Mpsc::<Node>::new();
        let mut a = Node { link: Link::new(), producer: 0, tag: 1 };
        let mut b = Node { link: Link::new(), producer: 0, tag: 2 };
        let mut c = Node { link: Link::new(), producer: 0, tag: 3 };
        unsafe {
            q.push(&mut a);
            q.push(&mut b);
        }
        unsafe {
            assert_eq!((*q.try_pop()).tag, 1);
            q.push(&mut c);
            assert_eq!((*q.try_pop()).tag, 2);
            q.push(&mut b);
            assert_eq!((*q.try_pop()).tag, 3);
            assert_eq!((*q.try_pop()).tag, 2);
        }
    }

    #[test]
    fn two_producers_preserve_per_producer_order() {
        const N: u32 = 5_000;
        let q = Arc::new(Mpsc::<Node>::new());

        // Boxed and leaked so they outlive both producer threads; freed
        // explicitly once the consumer has drained everything.
        let mut handles = Vec::new();
        for producer in 0..2u32 {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                let mut nodes = Vec::with_capacity(N as usize);
                for tag in 0..N {
                    let node = Box::into_raw(Box::new(Node {
                        link: Link::new(),
                        producer,
                        tag,
                    }));
                    unsafe {
                        q.push(node);
                    }
                    nodes.push(node);
                }
                nodes
            }));
        }

        let mut last_tag = [None::<u32>, None::<u32>];
        let mut drained = 0u32;
        let mut leaked = Vec::new();
        while drained < N * 2 {
            let node = q.try_pop();
            if node.is_null() {
                thread::yield_now();
                continue;
            }
            unsafe {
                let n = &*node;
                if let Some(prev) = last_tag[n.producer as usize] {
                    assert!(n.tag > prev, "per-producer order violated");
                }
                last_tag[n.producer as usize] = Some(n.tag);
            }
            leaked.push(node);
            drained += 1;
        }

        for h in handles {
            h.join().unwrap();
        }
        for node in leaked {
            unsafe {
                drop(Box::from_raw(node));
            }
        }
    }
}
