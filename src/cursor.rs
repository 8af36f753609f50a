use crate::formats::Container;
use crate::packed::RawRecord;
use crate::types::Region;
use crate::{Error, Result};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
enum Scope {
    Region(Region),
    WholeFile,
}

/// Iteration over one region, or over every contig of an index in order.
///
/// The cursor keeps one record fetched ahead so that [`at_end`] is exact:
/// it turns true right after the last record has been handed out, never
/// while one is still pending.
///
/// In whole-file mode a drained contig moves the cursor to the next one in
/// index order, skipping contigs without records. An explicit region ends
/// when its own query drains.
///
/// [`at_end`]: RegionCursor::at_end
pub struct RegionCursor<Q> {
    scope: Scope,
    contigs: Vec<String>,
    current: usize,
    query: Option<Q>,
    pending: Option<RawRecord>,
    deferred: Option<Error>,
    exhausted: bool,
}

impl<Q> RegionCursor<Q> {
    /// Bind a cursor to one region.
    pub fn for_region<C>(container: &mut C, index: &C::Index, region: Region) -> Result<Self>
    where
        C: Container<Query = Q>,
    {
        let contigs = container.contigs(index);
        let current = contigs
            .iter()
            .position(|name| *name == region.reference_name)
            .ok_or_else(|| Error::UnknownContig(region.reference_name.clone()))?;

        let query = container.query(index, &region)?;
        debug!(region = %region, "region cursor bound");

        let mut cursor = Self {
            scope: Scope::Region(region),
            contigs,
            current,
            query: Some(query),
            pending: None,
            deferred: None,
            exhausted: false,
        };
        cursor.pending = cursor.fetch(container, index)?;
        Ok(cursor)
    }

    /// Bind a cursor to the first contig of the index, to walk all of them.
    pub fn whole_file<C>(container: &mut C, index: &C::Index) -> Result<Self>
    where
        C: Container<Query = Q>,
    {
        let contigs = container.contigs(index);
        let query = match contigs.first() {
            Some(first) => Some(container.query(index, &Region::contig(first.as_str()))?),
            None => None,
        };
        debug!(contigs = contigs.len(), "whole-file cursor bound");

        let mut cursor = Self {
            scope: Scope::WholeFile,
            exhausted: query.is_none(),
            contigs,
            current: 0,
            query,
            pending: None,
            deferred: None,
        };
        cursor.pending = cursor.fetch(container, index)?;
        Ok(cursor)
    }

    /// Next record, or `Ok(None)` once the cursor is exhausted.
    pub fn next<C>(&mut self, container: &mut C, index: &C::Index) -> Result<Option<RawRecord>>
    where
        C: Container<Query = Q>,
    {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        let Some(record) = self.pending.take() else {
            return Ok(None);
        };

        // a failing look-ahead must not swallow the record already in hand
        match self.fetch(container, index) {
            Ok(next) => self.pending = next,
            Err(err) => self.deferred = Some(err),
        }
        Ok(Some(record))
    }

    /// True once every record has been returned.
    pub fn at_end(&self) -> bool {
        self.pending.is_none() && self.deferred.is_none()
    }

    /// The contig the cursor is on
    pub fn current_contig(&self) -> Option<&str> {
        self.contigs.get(self.current).map(String::as_str)
    }

    /// The explicit region, `None` in whole-file mode
    pub fn region(&self) -> Option<&Region> {
        match &self.scope {
            Scope::Region(region) => Some(region),
            Scope::WholeFile => None,
        }
    }

    fn fetch<C>(&mut self, container: &mut C, index: &C::Index) -> Result<Option<RawRecord>>
    where
        C: Container<Query = Q>,
    {
        loop {
            if self.exhausted {
                return Ok(None);
            }

            if let Some(query) = self.query.as_mut() {
                if let Some(record) = container.advance(query)? {
                    return Ok(Some(record));
                }
            }

            // the old query is released before the next one is bound
            self.query = None;

            let has_next_contig = self.current + 1 < self.contigs.len();
            if matches!(self.scope, Scope::Region(_)) || !has_next_contig {
                self.exhausted = true;
                continue;
            }

            self.current += 1;
            let contig = Region::contig(self.contigs[self.current].as_str());
            trace!(contig = %contig, "advancing to next contig");
            self.query = Some(container.query(index, &contig)?);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{MemoryContainer, MemoryIndex, MemoryQuery};
    use crate::packed::PackedRecord;
    use std::path::Path;

    fn read(contig: i32, pos: i32, name: &str) -> RawRecord {
        RawRecord::Packed(PackedRecord {
            ref_id: contig,
            pos,
            flag: 0,
            name: name.as_bytes().to_vec(),
            cigar: vec![5 << 4],
            ..PackedRecord::default()
        })
    }

    fn name(record: RawRecord) -> String {
        match record {
            RawRecord::Packed(packed) => String::from_utf8(packed.name).unwrap(),
            RawRecord::Line(line) => line,
        }
    }

    fn indexed(contigs: &[&str], records: &[(i32, i32, &str)]) -> (MemoryContainer, MemoryIndex) {
        let mut container = MemoryContainer::new(contigs.iter().copied());
        for &(contig, pos, name) in records {
            container.push(read(contig, pos, name)).unwrap();
        }
        let path = container.build_index(Path::new("mem"), None).unwrap();
        let index = container.load_index(&path).unwrap().unwrap();
        (container, index)
    }

    fn collect(
        cursor: &mut RegionCursor<MemoryQuery>,
        container: &mut MemoryContainer,
        index: &MemoryIndex,
    ) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(record) = cursor.next(container, index).unwrap() {
            names.push(name(record));
        }
        names
    }

    #[test]
    fn test_whole_file_visits_every_contig_in_order() {
        let (mut container, index) = indexed(
            &["chr1", "chr2"],
            &[
                (0, 10, "a0"),
                (0, 20, "a1"),
                (0, 30, "a2"),
                (1, 10, "b0"),
                (1, 20, "b1"),
                (1, 30, "b2"),
            ],
        );

        let mut cursor = RegionCursor::whole_file(&mut container, &index).unwrap();
        let mut names = Vec::new();
        for _ in 0..6 {
            assert!(!cursor.at_end());
            names.push(name(cursor.next(&mut container, &index).unwrap().unwrap()));
        }
        assert!(cursor.at_end());
        assert!(cursor.next(&mut container, &index).unwrap().is_none());
        assert_eq!(names, vec!["a0", "a1", "a2", "b0", "b1", "b2"]);
    }

    #[test]
    fn test_whole_file_skips_empty_contigs() {
        let (mut container, index) = indexed(
            &["chr1", "chr2", "chr3", "chr4"],
            &[(0, 10, "a"), (3, 10, "d")],
        );

        let mut cursor = RegionCursor::whole_file(&mut container, &index).unwrap();
        assert_eq!(collect(&mut cursor, &mut container, &index), vec!["a", "d"]);
        assert_eq!(cursor.current_contig(), Some("chr4"));
    }

    #[test]
    fn test_whole_file_without_contigs_is_at_end() {
        let (mut container, index) = indexed(&[], &[]);
        let mut cursor = RegionCursor::whole_file(&mut container, &index).unwrap();
        assert!(cursor.at_end());
        assert!(cursor.next(&mut container, &index).unwrap().is_none());
    }

    #[test]
    fn test_explicit_region_is_bounded() {
        let (mut container, index) = indexed(
            &["chr1", "chr2"],
            &[(0, 10, "a0"), (0, 500, "a1"), (1, 10, "b0")],
        );

        let region: Region = "chr1:1-100".parse().unwrap();
        let mut cursor = RegionCursor::for_region(&mut container, &index, region).unwrap();
        assert_eq!(collect(&mut cursor, &mut container, &index), vec!["a0"]);
        assert!(cursor.at_end());
        assert_eq!(cursor.current_contig(), Some("chr1"));

        let mut cursor =
            RegionCursor::for_region(&mut container, &index, Region::contig("chr1")).unwrap();
        assert_eq!(collect(&mut cursor, &mut container, &index), vec!["a0", "a1"]);
    }

    #[test]
    fn test_empty_region_is_immediately_at_end() {
        let (mut container, index) = indexed(&["chr1"], &[(0, 10, "a0")]);
        let region: Region = "chr1:5000-6000".parse().unwrap();
        let cursor = RegionCursor::for_region(&mut container, &index, region).unwrap();
        assert!(cursor.at_end());
        assert!(cursor.region().is_some());
    }

    #[test]
    fn test_unknown_contig_is_region_error() {
        let (mut container, index) = indexed(&["chr1"], &[(0, 10, "a0")]);
        let err = RegionCursor::for_region(&mut container, &index, Region::contig("chrM"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Region);
    }
}
