//! Strided tensor views: the external interface boundary through which the
//! driver reads candidate scores, indices, and sequence lengths from
//! whatever host framework owns the underlying buffers.
//!
//! Deliberately minimal — base pointer plus byte strides, no bounds
//! checking, no ownership — matching the spec's "host-language bindings
//! present tensors as strided byte views" contract. The bindings themselves
//! (Python/Cython glue, reference counting) are out of scope; this is just
//! the reader.

use std::marker::PhantomData;

#[derive(Clone, Copy)]
pub struct TensorView<T> {
    base: *const u8,
    strides: [isize; 3],
    _marker: PhantomData<fn() -> T>,
}

// SAFETY: `TensorView` never mutates through `base`, and the caller is
// responsible for the pointed-to buffer outliving every use (see
// `from_raw`'s safety doc). Sharing a read-only pointer across threads is
// sound as long as that holds.
unsafe impl<T> Send for TensorView<T> {}
unsafe impl<T> Sync for TensorView<T> {}

impl<T: Copy> TensorView<T> {
    /// Builds a view directly from a base pointer and byte strides.
    ///
    /// # Safety
    /// `base` must be valid for reads of `T` at every `(i, j, k)` offset the
    /// view is later indexed with, for as long as the view is used. No
    /// bounds checking is performed, matching the host binding's contract.
    pub unsafe fn from_raw(base: *const u8, strides: [isize; 3]) -> Self {
        Self {
            base,
            strides,
            _marker: PhantomData,
        }
    }

    /// Builds a row-major view over an owned 3D buffer, useful for tests and
    /// the CLI's synthetic tensors.
    pub fn from_row_major_3d(data: &[T], shape: [usize; 3]) -> Self {
        assert_eq!(data.len(), shape[0] * shape[1] * shape[2]);
        let elem = std::mem::size_of::<T>() as isize;
        let s2 = elem;
        let s1 = s2 * shape[2] as isize;
        let s0 = s1 * shape[1] as isize;
        Self {
            base: data.as_ptr() as *const u8,
            strides: [s0, s1, s2],
            _marker: PhantomData,
        }
    }

    /// Builds a row-major view over an owned 1D buffer.
    pub fn from_row_major_1d(data: &[T]) -> Self {
        let elem = std::mem::size_of::<T>() as isize;
        Self {
            base: data.as_ptr() as *const u8,
            strides: [elem, 0, 0],
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn at3(&self, i: usize, j: usize, k: usize) -> T {
        let offset =
            i as isize * self.strides[0] + j as isize * self.strides[1] + k as isize * self.strides[2];
        // SAFETY: contract is on the constructor; callers of `at3`/`at1`
        // inherit it transitively.
        unsafe { *(self.base.offset(offset) as *const T) }
    }

    #[inline]
    pub fn at1(&self, i: usize) -> T {
        self.at3(i, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_3d_indexing() {
        let data: Vec<f32> = (0..24).map(|x| x as f32).collect();
        let view = TensorView::from_row_major_3d(&data, [2, 3, 4]);
        assert_eq!(view.at3(0, 0, 0), 0.0);
        assert_eq!(view.at3(1, 2, 3), 23.0);
        assert_eq!(view.at3(0, 1, 0), 4.0);
    }

    #[test]
    fn row_major_1d_indexing() {
        let data = [10i32, 20, 30];
        let view = TensorView::from_row_major_1d(&data);
        assert_eq!(view.at1(1), 20);
    }
}
