#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::sync::atomic::{fence, AtomicI64, AtomicPtr, AtomicU32, Ordering};
    pub(crate) use loom::thread::yield_now;
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use core::sync::atomic::{fence, AtomicI64, AtomicPtr, AtomicU32, Ordering};
    pub(crate) use std::thread::yield_now;
}

pub(crate) use imp::*;
