//! Typed views over a decoded `PrimitiveBlock`: ways with resolved tags and
//! absolute node refs, and nodes with coordinates in degrees.

use std::borrow::Cow;

use crate::error::{BlobError, Result};
use crate::proto::{DenseNodes, PrimitiveBlock, Way};

/// Default nanodegrees per coordinate unit.
pub const DEFAULT_GRANULARITY: i32 = 100;

const NANO: f64 = 1e-9;

/// Running-sum decoder over a delta-coded sequence; the first delta is
/// relative to zero.
#[derive(Debug, Clone)]
pub struct DeltaDecoder<I> {
    deltas: I,
    current: i64,
}

impl<I> DeltaDecoder<I> {
    pub fn new(deltas: I) -> Self {
        Self { deltas, current: 0 }
    }
}

impl<I: Iterator<Item = i64>> Iterator for DeltaDecoder<I> {
    type Item = i64;

    #[inline]
    fn next(&mut self) -> Option<i64> {
        let delta = self.deltas.next()?;
        self.current = self.current.wrapping_add(delta);
        Some(self.current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.deltas.size_hint()
    }
}

impl<I: ExactSizeIterator<Item = i64>> ExactSizeIterator for DeltaDecoder<I> {}

pub fn delta_decode(deltas: &[i64]) -> Vec<i64> {
    DeltaDecoder::new(deltas.iter().copied()).collect()
}

pub fn delta_encode(values: &[i64]) -> Vec<i64> {
    let mut previous = 0i64;
    values
        .iter()
        .map(|&value| {
            let delta = value.wrapping_sub(previous);
            previous = value;
            delta
        })
        .collect()
}

/// A node position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
}

/// Per-block coordinate scaling: `deg = 1e-9 * (offset + granularity * raw)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordScale {
    pub granularity: i64,
    pub lat_offset: i64,
    pub lon_offset: i64,
}

impl Default for CoordScale {
    fn default() -> Self {
        Self {
            granularity: DEFAULT_GRANULARITY as i64,
            lat_offset: 0,
            lon_offset: 0,
        }
    }
}

impl CoordScale {
    /// Floating point throughout; never overflows.
    #[inline]
    pub fn lat(&self, raw: i64) -> f64 {
        NANO * (self.lat_offset as f64 + self.granularity as f64 * raw as f64)
    }

    #[inline]
    pub fn lon(&self, raw: i64) -> f64 {
        NANO * (self.lon_offset as f64 + self.granularity as f64 * raw as f64)
    }

    /// True if both raw values scale to nanodegrees without leaving `i64`.
    pub fn in_range(&self, raw_lat: i64, raw_lon: i64) -> bool {
        let fits = |offset: i64, raw: i64| {
            self.granularity
                .checked_mul(raw)
                .and_then(|units| units.checked_add(offset))
                .is_some()
        };
        fits(self.lat_offset, raw_lat) && fits(self.lon_offset, raw_lon)
    }

    /// Inverse of [`CoordScale::lat`], rounded to the nearest unit.
    #[inline]
    pub fn raw_lat(&self, deg: f64) -> i64 {
        ((deg / NANO - self.lat_offset as f64) / self.granularity as f64).round() as i64
    }

    #[inline]
    pub fn raw_lon(&self, deg: f64) -> i64 {
        ((deg / NANO - self.lon_offset as f64) / self.granularity as f64).round() as i64
    }
}

/// A way together with the string table needed to read its tags.
#[derive(Clone, Copy)]
pub struct WayRef<'a> {
    block: &'a PrimitiveBlock,
    way: &'a Way,
}

impl<'a> WayRef<'a> {
    #[inline]
    pub fn id(&self) -> i64 {
        self.way.id
    }

    /// Tag pairs in stored order. Indices were checked by `validate`.
    pub fn tags(&self) -> impl Iterator<Item = (Cow<'a, str>, Cow<'a, str>)> + 'a {
        let block = self.block;
        self.way
            .keys
            .iter()
            .zip(self.way.vals.iter())
            .map(move |(&k, &v)| (block.string(k), block.string(v)))
    }

    /// Absolute node ids, reconstructed from the stored deltas.
    pub fn refs(&self) -> DeltaDecoder<std::iter::Copied<std::slice::Iter<'a, i64>>> {
        DeltaDecoder::new(self.way.refs.iter().copied())
    }

    pub fn ref_count(&self) -> usize {
        self.way.refs.len()
    }
}

impl PrimitiveBlock {
    pub fn scale(&self) -> CoordScale {
        CoordScale {
            granularity: self.granularity.unwrap_or(DEFAULT_GRANULARITY) as i64,
            lat_offset: self.lat_offset.unwrap_or(0),
            lon_offset: self.lon_offset.unwrap_or(0),
        }
    }

    /// String-table entry `index`, lossily decoded. Empty if out of range;
    /// `validate` rejects blocks where that could happen.
    pub fn string(&self, index: u32) -> Cow<'_, str> {
        self.stringtable
            .s
            .get(index as usize)
            .map(|bytes| String::from_utf8_lossy(bytes))
            .unwrap_or(Cow::Borrowed(""))
    }

    pub fn ways(&self) -> impl Iterator<Item = WayRef<'_>> + '_ {
        self.primitivegroup
            .iter()
            .flat_map(|group| group.ways.iter())
            .map(move |way| WayRef { block: self, way })
    }

    /// Plain and dense nodes, group by group, with coordinates in degrees.
    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        self.points_where(|_| true)
    }

    /// Like [`PrimitiveBlock::points`], but only scales the nodes whose id
    /// passes `keep`.
    pub fn points_where<'s>(
        &'s self,
        keep: impl Fn(i64) -> bool + 's,
    ) -> impl Iterator<Item = Point> + 's {
        let scale = self.scale();

        self.raw_nodes()
            .filter(move |&(id, _, _)| keep(id))
            .map(move |(id, lat, lon)| Point {
                id,
                lat: scale.lat(lat),
                lon: scale.lon(lon),
            })
    }

    /// `(id, raw_lat, raw_lon)` for plain then dense nodes of every group.
    fn raw_nodes(&self) -> impl Iterator<Item = (i64, i64, i64)> + '_ {
        self.primitivegroup.iter().flat_map(|group| {
            let plain = group.nodes.iter().map(|node| (node.id, node.lat, node.lon));
            let dense = group.dense.iter().flat_map(dense_raw);
            plain.chain(dense)
        })
    }

    /// Structural checks that make the accessors above infallible, plus a
    /// range check on every node position.
    pub fn validate(&self) -> Result<()> {
        let scale = self.scale();
        let strings = self.stringtable.s.len();
        let check = |index: u32| -> Result<()> {
            if (index as usize) < strings {
                Ok(())
            } else {
                Err(BlobError::StringIndex { index, len: strings })
            }
        };

        for group in &self.primitivegroup {
            for way in &group.ways {
                if way.keys.len() != way.vals.len() {
                    return Err(BlobError::TagArity {
                        id: way.id,
                        keys: way.keys.len(),
                        vals: way.vals.len(),
                    });
                }
                way.keys.iter().chain(way.vals.iter()).try_for_each(|&i| check(i))?;
            }

            for node in &group.nodes {
                if node.keys.len() != node.vals.len() {
                    return Err(BlobError::TagArity {
                        id: node.id,
                        keys: node.keys.len(),
                        vals: node.vals.len(),
                    });
                }
                node.keys.iter().chain(node.vals.iter()).try_for_each(|&i| check(i))?;
                if !scale.in_range(node.lat, node.lon) {
                    return Err(BlobError::CoordinateRange { id: node.id });
                }
            }

            if let Some(dense) = &group.dense {
                if dense.id.len() != dense.lat.len() || dense.id.len() != dense.lon.len() {
                    return Err(BlobError::DenseArity {
                        ids: dense.id.len(),
                        lats: dense.lat.len(),
                        lons: dense.lon.len(),
                    });
                }
                for &i in &dense.keys_vals {
                    if i < 0 {
                        return Err(BlobError::StringIndex {
                            index: i as u32,
                            len: strings,
                        });
                    }
                    check(i as u32)?;
                }
                if let Some((id, _, _)) =
                    dense_raw(dense).find(|&(_, lat, lon)| !scale.in_range(lat, lon))
                {
                    return Err(BlobError::CoordinateRange { id });
                }
            }
        }

        Ok(())
    }
}

fn dense_raw(dense: &DenseNodes) -> impl Iterator<Item = (i64, i64, i64)> + '_ {
    let ids = DeltaDecoder::new(dense.id.iter().copied());
    let lats = DeltaDecoder::new(dense.lat.iter().copied());
    let lons = DeltaDecoder::new(dense.lon.iter().copied());

    ids.zip(lats).zip(lons).map(|((id, lat), lon)| (id, lat, lon))
}
