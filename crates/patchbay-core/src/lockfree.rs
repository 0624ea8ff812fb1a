//! Scalar slots shared across the control ↔ audio thread boundary.
//!
//! An [`RtSlot`] holds one plain scalar behind a lock-free atomic: the
//! control thread publishes with release ordering, the render path reads
//! with acquire ordering, and neither side ever blocks. Each slot is
//! padded to its own cache line so a farm of slots (tempo, flags, rates)
//! never false-shares.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use atomic_float::{AtomicF32, AtomicF64};

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for bool {}
}

/// Scalars with a lock-free atomic representation.
///
/// Implemented for the primitives the render path actually exchanges:
/// `f32`, `f64` and `bool`.
pub trait RtValue: Copy + sealed::Sealed {
    #[doc(hidden)]
    type Atomic: Send + Sync;
    #[doc(hidden)]
    fn pack(self) -> Self::Atomic;
    #[doc(hidden)]
    fn load(atomic: &Self::Atomic, order: Ordering) -> Self;
    #[doc(hidden)]
    fn store(atomic: &Self::Atomic, value: Self, order: Ordering);
}

macro_rules! rt_value {
    ($value:ty => $atomic:ty) => {
        impl RtValue for $value {
            type Atomic = $atomic;

            fn pack(self) -> Self::Atomic {
                <$atomic>::new(self)
            }

            fn load(atomic: &Self::Atomic, order: Ordering) -> Self {
                atomic.load(order)
            }

            fn store(atomic: &Self::Atomic, value: Self, order: Ordering) {
                atomic.store(value, order);
            }
        }
    };
}

rt_value!(f32 => AtomicF32);
rt_value!(f64 => AtomicF64);
rt_value!(bool => AtomicBool);

/// A cache-line padded atomic cell for one [`RtValue`].
#[repr(align(64))]
pub struct RtSlot<T: RtValue> {
    cell: T::Atomic,
}

impl<T: RtValue> RtSlot<T> {
    pub fn new(value: T) -> Self {
        Self { cell: value.pack() }
    }

    #[inline]
    pub fn get(&self) -> T {
        T::load(&self.cell, Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: T) {
        T::store(&self.cell, value, Ordering::Release);
    }
}

impl<T: RtValue + fmt::Debug> fmt::Debug for RtSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RtSlot").field(&self.get()).finish()
    }
}
