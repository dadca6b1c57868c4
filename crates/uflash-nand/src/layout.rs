//! Page layouts and canonical/raw conversion
//!
//! An ECC engine declares where every byte of a raw page lives. The
//! canonical layout keeps all data bytes contiguous followed by the OOB
//! bytes; converting between the two is a pure byte permutation driven by
//! the two layouts.

use bitflags::bitflags;
use uflash_core::error::{Error, Result};

/// What one byte of a raw page is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageByteKind {
    /// Not used by anything
    Unused,
    /// Main data
    Data,
    /// ECC-protected OOB byte
    OobData,
    /// Unprotected OOB byte
    OobFree,
    /// ECC parity byte
    EccParity,
    /// Bad-block marker position
    Marker,
}

impl PageByteKind {
    /// Whether the byte carries user-visible OOB content
    pub fn is_oob(self) -> bool {
        matches!(self, PageByteKind::OobData | PageByteKind::OobFree | PageByteKind::Marker)
    }
}

/// An ordered run-length description of a page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLayout {
    entries: Vec<(u32, PageByteKind)>,
}

bitflags! {
    /// Behavior of [`fill_page_by_layout`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FillFlags: u32 {
        /// Write 0xFF into every non-data byte
        const FILL_NON_DATA_FF = 1 << 0;
        /// Write 0xFF into OOB bytes
        const FILL_OOB = 1 << 1;
        /// Write 0xFF into unprotected OOB bytes
        const FILL_UNPROTECTED_OOB = 1 << 2;
        /// Write 0xFF into unused bytes
        const FILL_UNUSED = 1 << 3;
        /// Write 0xFF into ECC parity bytes
        const FILL_ECC_PARITY = 1 << 4;
        /// The source buffer holds data bytes only
        const SRC_SKIP_NON_DATA = 1 << 5;
    }
}

impl PageLayout {
    /// Append a run of bytes of one kind; zero-length runs are dropped
    pub fn add(&mut self, count: u32, kind: PageByteKind) {
        if count > 0 {
            self.entries.push((count, kind));
        }
    }

    /// The runs in order
    pub fn entries(&self) -> &[(u32, PageByteKind)] {
        &self.entries
    }

    /// Total byte count described
    pub fn total(&self) -> u32 {
        self.entries.iter().map(|(n, _)| n).sum()
    }

    /// Expand to one kind code per byte offset
    pub fn to_map(&self) -> Vec<PageByteKind> {
        let mut map = Vec::with_capacity(self.total() as usize);
        for &(n, kind) in &self.entries {
            map.extend(std::iter::repeat(kind).take(n as usize));
        }
        map
    }

    /// The trivial canonical layout: all data, then all OOB
    pub fn canonical(page_size: u32, oob_size: u32) -> Self {
        let mut layout = PageLayout::default();
        layout.add(page_size, PageByteKind::Data);
        layout.add(oob_size, PageByteKind::OobData);
        layout
    }
}

/// Walk `layout`, writing `dst` from `src`, substituting 0xFF per flags.
///
/// The source is consumed byte-for-byte unless `SRC_SKIP_NON_DATA`, in which
/// case only data bytes advance it. `count` caps the bytes written (0 = the
/// whole layout). Returns the bytes written.
pub fn fill_page_by_layout(
    layout: &PageLayout,
    dst: &mut [u8],
    src: &[u8],
    count: u32,
    flags: FillFlags,
) -> u32 {
    let limit = if count == 0 {
        layout.total()
    } else {
        count.min(layout.total())
    } as usize;

    let mut di = 0usize;
    let mut si = 0usize;

    'outer: for &(n, kind) in layout.entries() {
        for _ in 0..n {
            if di >= limit || di >= dst.len() {
                break 'outer;
            }

            let fill_ff = match kind {
                PageByteKind::Data => false,
                PageByteKind::Unused => {
                    flags.intersects(FillFlags::FILL_NON_DATA_FF | FillFlags::FILL_UNUSED)
                }
                PageByteKind::EccParity => {
                    flags.intersects(FillFlags::FILL_NON_DATA_FF | FillFlags::FILL_ECC_PARITY)
                }
                PageByteKind::OobFree => flags.intersects(
                    FillFlags::FILL_NON_DATA_FF
                        | FillFlags::FILL_OOB
                        | FillFlags::FILL_UNPROTECTED_OOB,
                ),
                PageByteKind::OobData | PageByteKind::Marker => {
                    flags.intersects(FillFlags::FILL_NON_DATA_FF | FillFlags::FILL_OOB)
                }
            };

            let consume_src = kind == PageByteKind::Data
                || !flags.contains(FillFlags::SRC_SKIP_NON_DATA);

            if fill_ff {
                dst[di] = 0xFF;
            } else {
                dst[di] = src.get(si).copied().unwrap_or(0xFF);
            }

            if consume_src {
                si += 1;
            }
            di += 1;
        }
    }

    di as u32
}

/// Permute `src` (laid out per `src_layout`) into `dst` (laid out per
/// `dst_layout`). Both layouts must describe the same byte population.
pub fn convert_page(
    src_layout: &PageLayout,
    dst_layout: &PageLayout,
    src: &[u8],
    dst: &mut [u8],
) -> Result<()> {
    let total = src_layout.total();
    if total != dst_layout.total() {
        return Err(Error::InvalidParameter("layout sizes differ"));
    }
    if src.len() < total as usize || dst.len() < total as usize {
        return Err(Error::InvalidParameter("page buffer too short"));
    }

    let src_map = src_layout.to_map();
    let dst_map = dst_layout.to_map();

    // For each byte kind, the n-th source byte of that kind becomes the n-th
    // destination byte of that kind.
    let mut src_pos: [Vec<usize>; 6] = Default::default();
    for (i, kind) in src_map.iter().enumerate() {
        src_pos[*kind as usize].push(i);
    }

    let mut next: [usize; 6] = [0; 6];
    for (di, kind) in dst_map.iter().enumerate() {
        let k = *kind as usize;
        let list = &src_pos[k];
        let Some(&si) = list.get(next[k]) else {
            return Err(Error::InvalidParameter("layout byte populations differ"));
        };
        next[k] += 1;
        dst[di] = src[si];
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_layout() -> PageLayout {
        // Two sectors of 4 data + 2 oob + 2 parity
        let mut l = PageLayout::default();
        for _ in 0..2 {
            l.add(4, PageByteKind::Data);
            l.add(2, PageByteKind::OobData);
            l.add(2, PageByteKind::EccParity);
        }
        l
    }

    fn canonical_layout() -> PageLayout {
        let mut l = PageLayout::default();
        l.add(8, PageByteKind::Data);
        l.add(4, PageByteKind::OobData);
        l.add(4, PageByteKind::EccParity);
        l
    }

    #[test]
    fn map_length_and_counts() {
        let l = raw_layout();
        let map = l.to_map();
        assert_eq!(map.len(), 16);
        assert_eq!(map.iter().filter(|k| **k == PageByteKind::Data).count(), 8);
        assert_eq!(
            map.iter().filter(|k| **k == PageByteKind::EccParity).count(),
            4
        );
    }

    #[test]
    fn convert_roundtrip_is_identity() {
        let raw = raw_layout();
        let canon = canonical_layout();

        let src: Vec<u8> = (0u8..16).collect();
        let mut mid = vec![0u8; 16];
        let mut back = vec![0u8; 16];

        convert_page(&raw, &canon, &src, &mut mid).unwrap();
        convert_page(&canon, &raw, &mid, &mut back).unwrap();
        assert_eq!(src, back);

        // Canonical form groups the data bytes first
        assert_eq!(&mid[..4], &src[..4]);
        assert_eq!(&mid[4..8], &src[8..12]);
    }

    #[test]
    fn fill_substitutes_ff() {
        let raw = raw_layout();
        let src: Vec<u8> = (0u8..16).collect();
        let mut dst = vec![0u8; 16];

        let n = fill_page_by_layout(&raw, &mut dst, &src, 0, FillFlags::FILL_ECC_PARITY);
        assert_eq!(n, 16);
        assert_eq!(&dst[..6], &src[..6]);
        assert_eq!(&dst[6..8], &[0xFF, 0xFF]);
        assert_eq!(&dst[8..14], &src[8..14]);
    }

    #[test]
    fn fill_from_data_only_source() {
        let raw = raw_layout();
        let src: Vec<u8> = (0u8..8).collect(); // data bytes only
        let mut dst = vec![0u8; 16];

        fill_page_by_layout(
            &raw,
            &mut dst,
            &src,
            0,
            FillFlags::FILL_NON_DATA_FF | FillFlags::SRC_SKIP_NON_DATA,
        );
        assert_eq!(&dst[..4], &src[..4]);
        assert_eq!(&dst[4..8], &[0xFF; 4]);
        assert_eq!(&dst[8..12], &src[4..8]);
        assert_eq!(&dst[12..16], &[0xFF; 4]);
    }
}
