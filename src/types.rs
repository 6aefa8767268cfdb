use std::fmt::Debug;
use std::iter::Sum;
use std::ops::{AddAssign, SubAssign};

use num::{Float, FromPrimitive, ToPrimitive};
use serde::{de::DeserializeOwned, Serialize};

/// The floating point abstraction behind the `precision` option. The whole
/// core is monomorphised over this trait; `f32` and `f64` are the only
/// implementors.
pub trait FloatingPoint:
    Float
    + FromPrimitive
    + ToPrimitive
    + AddAssign
    + SubAssign
    + Sum
    + Default
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The largest representable value strictly below `self`. Only called on
    /// finite values.
    fn step_down(self) -> Self;

    fn from_f64_lossy(value: f64) -> Self;
    fn to_f64_lossy(self) -> f64;
}

impl FloatingPoint for f32 {
    fn step_down(self) -> f32 {
        let bits = self.to_bits();
        if self > 0.0 {
            f32::from_bits(bits - 1)
        } else if self == 0.0 {
            f32::from_bits(0x8000_0001)
        } else {
            f32::from_bits(bits + 1)
        }
    }

    fn from_f64_lossy(value: f64) -> f32 {
        value as f32
    }

    fn to_f64_lossy(self) -> f64 {
        self as f64
    }
}

impl FloatingPoint for f64 {
    fn step_down(self) -> f64 {
        let bits = self.to_bits();
        if self > 0.0 {
            f64::from_bits(bits - 1)
        } else if self == 0.0 {
            f64::from_bits(0x8000_0000_0000_0001)
        } else {
            f64::from_bits(bits + 1)
        }
    }

    fn from_f64_lossy(value: f64) -> f64 {
        value
    }

    fn to_f64_lossy(self) -> f64 {
        self
    }
}

/// Index type vended by the column stores. The width tiers (u8 / u16 / u32)
/// implement this instead of `TryFrom<usize>` because std provides no
/// `From<u32> for usize` and the conversions here are always range-checked
/// at store construction.
pub trait SlotIndex: Copy + PartialEq + Eq + Debug + Send + Sync + 'static {
    const MAX: Self;

    fn from_usize(index: usize) -> Self;
    fn to_usize(self) -> usize;
}

macro_rules! slot_index {
    ($t:ty) => {
        impl SlotIndex for $t {
            const MAX: Self = <$t>::MAX;

            #[inline]
            fn from_usize(index: usize) -> Self {
                debug_assert!(index <= <$t>::MAX as usize);
                index as $t
            }

            #[inline]
            fn to_usize(self) -> usize {
                self as usize
            }
        }
    };
}

slot_index!(u8);
slot_index!(u16);
slot_index!(u32);
slot_index!(usize);
