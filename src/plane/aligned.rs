use crate::foundation::error::{CombMaskError, CombMaskResult};

/// Zero-initialised byte region whose first byte sits on an `align` boundary.
///
/// The backing vector is over-allocated by `align` bytes and the usable region starts at
/// the first aligned offset, so alignment survives moves of the owning struct.
pub(crate) struct AlignedBytes {
    storage: Vec<u8>,
    offset: usize,
    len: usize,
    align: usize,
}

impl AlignedBytes {
    pub(crate) fn zeroed(len: usize, align: usize) -> CombMaskResult<Self> {
        if align == 0 || !align.is_power_of_two() {
            return Err(CombMaskError::allocation(len, align));
        }
        let total = len
            .checked_add(align)
            .ok_or_else(|| CombMaskError::allocation(len, align))?;

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(total)
            .map_err(|_| CombMaskError::allocation(len, align))?;
        storage.resize(total, 0);

        let offset = storage.as_ptr().align_offset(align);
        if offset >= align {
            return Err(CombMaskError::allocation(len, align));
        }
        Ok(Self {
            storage,
            offset,
            len,
            align,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn align(&self) -> usize {
        self.align
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.len]
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.offset..self.offset + self.len]
    }

    pub(crate) fn try_clone(&self) -> CombMaskResult<Self> {
        let mut out = Self::zeroed(self.len, self.align)?;
        out.as_mut_slice().copy_from_slice(self.as_slice());
        Ok(out)
    }
}

impl std::fmt::Debug for AlignedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBytes")
            .field("len", &self.len)
            .field("align", &self.align)
            .finish()
    }
}
