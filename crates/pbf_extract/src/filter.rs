//! Way matching and the ways/nodes table rows.

use std::io::{self, Write};

use pbfblob::{Point, WayRef};

use crate::sink::Row;

/// Names of the Paris ring road. Ways carrying either are tagged with
/// [`PERIPHERIQUE_CATEGORY`] whatever their filter value.
pub const PERIPHERIQUE_NAMES: [&str; 2] = [
    "Boulevard Périphérique Intérieur",
    "Boulevard Périphérique Extérieur",
];

pub const PERIPHERIQUE_CATEGORY: &str = "peripherique";

/// Selects ways by tag key. `values` is carried for reporting only: a way
/// matches as soon as it has the key, whatever the value.
#[derive(Debug, Clone)]
pub struct WayFilter {
    pub key: String,
    pub values: Vec<String>,
}

impl WayFilter {
    pub fn new(key: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            key: key.into(),
            values,
        }
    }

    /// Single scan over the way's tags. `name`, `ref` and `oneway` are
    /// picked up along the way but only kept if the filter key is present.
    pub fn apply(&self, way: &WayRef<'_>) -> Option<MatchedWay> {
        let mut category: Option<String> = None;
        let mut name = String::new();
        let mut reference = String::new();
        let mut oneway = String::new();
        let mut ring_road = false;

        for (key, value) in way.tags() {
            if key == self.key.as_str() {
                category = Some(value.clone().into_owned());
            }

            match &*key {
                "oneway" => oneway = value.into_owned(),
                "name" => {
                    ring_road |= PERIPHERIQUE_NAMES.iter().any(|ring| *ring == value);
                    name = value.into_owned();
                }
                "ref" => reference = value.into_owned(),
                _ => {}
            }
        }

        let mut category = category?;
        if ring_road {
            category = PERIPHERIQUE_CATEGORY.to_owned();
        }

        Some(MatchedWay {
            id: way.id(),
            name: sanitize_name(&name),
            reference,
            category,
            oneway,
            refs: way.refs().collect(),
        })
    }
}

/// Commas would break the table, so they are dropped.
pub fn sanitize_name(name: &str) -> String {
    name.replace(',', "")
}

/// A way that passed the filter, ready for the ways table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedWay {
    pub id: i64,
    pub name: String,
    pub reference: String,
    pub category: String,
    pub oneway: String,
    pub refs: Vec<i64>,
}

impl Row for MatchedWay {
    /// `id,name,ref,category,oneway,` then the refs, comma joined.
    fn write_row<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write!(
            out,
            "{},{},{},{},{},",
            self.id, self.name, self.reference, self.category, self.oneway
        )?;

        let mut refs = self.refs.iter();
        if let Some(first) = refs.next() {
            write!(out, "{first}")?;
            for node in refs {
                write!(out, ",{node}")?;
            }
        }

        out.write_all(b"\n")
    }
}

impl Row for Point {
    /// `id,lat,lon`, six fractional digits.
    fn write_row<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{},{:.6},{:.6}", self.id, self.lat, self.lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbfblob::write::BlockBuilder;

    fn highway_filter() -> WayFilter {
        WayFilter::new("highway", vec!["motorway".into(), "primary".into()])
    }

    fn first_match(tags: &[(&str, &str)], refs: &[i64]) -> Option<MatchedWay> {
        let block = BlockBuilder::new().way(77, tags, refs).build();
        let way = block.ways().next().unwrap();
        highway_filter().apply(&way)
    }

    fn row<R: Row>(row: &R) -> String {
        let mut out = Vec::new();
        row.write_row(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn matches_on_key_and_reconstructs_refs() {
        let way = first_match(
            &[("highway", "primary"), ("ref", "N 7"), ("oneway", "yes")],
            &[1000, 998, 1500],
        )
        .unwrap();

        assert_eq!(way.id, 77);
        assert_eq!(way.category, "primary");
        assert_eq!(way.reference, "N 7");
        assert_eq!(way.oneway, "yes");
        assert_eq!(way.refs, vec![1000, 998, 1500]);
    }

    #[test]
    fn ways_without_the_key_are_dropped() {
        assert!(first_match(&[("building", "yes"), ("name", "Hall")], &[1, 2]).is_none());
    }

    #[test]
    fn value_list_is_not_enforced() {
        let way = first_match(&[("highway", "footway")], &[1]).unwrap();
        assert_eq!(way.category, "footway");
    }

    #[test]
    fn commas_are_stripped_from_names() {
        let way = first_match(&[("name", "Main, St"), ("highway", "residential")], &[1]).unwrap();
        assert_eq!(way.name, "Main St");
    }

    #[test]
    fn ring_road_names_override_the_category() {
        for name in PERIPHERIQUE_NAMES {
            let way = first_match(&[("highway", "trunk"), ("name", name)], &[1, 2]).unwrap();
            assert_eq!(way.category, PERIPHERIQUE_CATEGORY);
            assert_eq!(way.name, name);
        }
    }

    #[test]
    fn ways_row_layout() {
        let way = MatchedWay {
            id: 5,
            name: "Main St".into(),
            reference: "D 1".into(),
            category: "primary".into(),
            oneway: String::new(),
            refs: vec![3, 1, 2],
        };
        assert_eq!(row(&way), "5,Main St,D 1,primary,,3,1,2\n");

        let bare = MatchedWay { refs: Vec::new(), ..way };
        assert_eq!(row(&bare), "5,Main St,D 1,primary,,\n");
    }

    #[test]
    fn nodes_row_layout() {
        let point = Point {
            id: 12,
            lat: 48.8566,
            lon: -2.5,
        };
        assert_eq!(row(&point), "12,48.856600,-2.500000\n");
    }
}
