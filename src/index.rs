//! Index acquisition: locate, load, build on demand.
//!
//! An index is only trusted when it is at least as new as the data file it
//! describes. A stale index is an error and is never rebuilt behind the
//! caller's back; a missing one may be built once when the caller asks for
//! it, after which loading is retried exactly once.

use crate::formats::Container;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How [`ensure_index`] finds or produces an index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Load from this path instead of the sidecar names
    pub index_path: Option<PathBuf>,
    /// Build the index when none is found, then load it once more
    pub build_if_missing: bool,
    /// Bin size exponent for the built index; `None` uses the format default
    pub min_shift: Option<u8>,
}

impl IndexOptions {
    pub fn build_if_missing() -> Self {
        Self {
            build_if_missing: true,
            ..Self::default()
        }
    }
}

/// Fail with [`Error::StaleIndex`] when the data file was modified after the index.
///
/// Paths that are not on disk are not checked.
pub fn check_freshness(data_path: &Path, index_path: &Path) -> Result<()> {
    let (Ok(data), Ok(index)) = (fs::metadata(data_path), fs::metadata(index_path)) else {
        return Ok(());
    };
    let (Ok(data_modified), Ok(index_modified)) = (data.modified(), index.modified()) else {
        return Ok(());
    };

    if data_modified > index_modified {
        return Err(Error::StaleIndex {
            data: data_path.to_path_buf(),
            index: index_path.to_path_buf(),
        });
    }
    Ok(())
}

/// Load the index found under the container's sidecar names for `data_path`.
pub fn load_index<C: Container>(container: &mut C, data_path: &Path) -> Result<C::Index> {
    let index_path = container
        .locate_index(data_path)
        .ok_or_else(|| Error::IndexNotFound(data_path.to_path_buf()))?;
    load_index_from(container, data_path, &index_path)
}

/// Load the index at an explicit path.
pub fn load_index_from<C: Container>(
    container: &mut C,
    data_path: &Path,
    index_path: &Path,
) -> Result<C::Index> {
    check_freshness(data_path, index_path)?;

    match container.load_index(index_path)? {
        Some(index) => {
            debug!(index = %index_path.display(), "loaded index");
            Ok(index)
        }
        None => Err(Error::IndexNotFound(index_path.to_path_buf())),
    }
}

/// Build an index for `data_path` and return where it was stored.
pub fn build_index<C: Container>(
    container: &mut C,
    data_path: &Path,
    min_shift: Option<u8>,
) -> Result<PathBuf> {
    info!(data = %data_path.display(), ?min_shift, "building index");
    container.build_index(data_path, min_shift)
}

/// Load an index, building it first if it is missing and the options allow.
///
/// Only a missing index leads to a build. The load after the build is
/// attempted once, from the path the build reported, and its error is
/// returned as is.
pub fn ensure_index<C: Container>(
    container: &mut C,
    data_path: &Path,
    options: &IndexOptions,
) -> Result<C::Index> {
    let loaded = match &options.index_path {
        Some(index_path) => load_index_from(container, data_path, index_path),
        None => load_index(container, data_path),
    };

    match loaded {
        Err(Error::IndexNotFound(missing)) if options.build_if_missing => {
            info!(missing = %missing.display(), "index not found");
            let built = build_index(container, data_path, options.min_shift)?;
            load_index_from(container, data_path, &built)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::formats::MemoryContainer;
    use crate::header::Header;
    use crate::packed::{PackedRecord, RawRecord};
    use crate::types::Region;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    fn populated() -> MemoryContainer {
        let mut container = MemoryContainer::new(["chr1", "chr2"]);
        for (contig, pos) in [(0, 10), (0, 20), (1, 5)] {
            container
                .push(RawRecord::Packed(PackedRecord {
                    ref_id: contig,
                    pos,
                    flag: 0,
                    name: b"r".to_vec(),
                    cigar: vec![4 << 4],
                    ..PackedRecord::default()
                }))
                .unwrap();
        }
        container
    }

    fn touch(path: &Path, modified: SystemTime) {
        let file = File::create(path).unwrap();
        file.set_modified(modified).unwrap();
    }

    #[test]
    fn test_missing_index_without_build_is_not_found() {
        let mut container = populated();
        let err = ensure_index(&mut container, Path::new("reads"), &IndexOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::IndexNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::Index);
    }

    #[test]
    fn test_ensure_index_builds_when_missing() {
        let mut container = populated();
        let index = ensure_index(
            &mut container,
            Path::new("reads"),
            &IndexOptions::build_if_missing(),
        )
        .unwrap();
        assert_eq!(container.contigs(&index), vec!["chr1", "chr2"]);

        // a second call finds the stored index
        assert!(load_index(&mut container, Path::new("reads")).is_ok());
    }

    #[test]
    fn test_ensure_index_honors_min_shift() {
        let mut container = populated();
        let options = IndexOptions {
            build_if_missing: true,
            min_shift: Some(3),
            ..IndexOptions::default()
        };
        let index = ensure_index(&mut container, Path::new("reads"), &options).unwrap();
        assert_eq!(index.min_shift, 3);
        // starts 11 and 21 fall into different 8bp bins
        assert_eq!(index.contigs[0].1.len(), 2);
    }

    #[test]
    fn test_stale_index_rejected_without_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("reads.mem");
        let now = SystemTime::now();

        let mut container = populated();
        let index_path = container.build_index(&data_path, None).unwrap();
        touch(&data_path, now);
        touch(&index_path, now - Duration::from_secs(3600));

        let err = ensure_index(
            &mut container,
            &data_path,
            &IndexOptions::build_if_missing(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::StaleIndex { .. }));
        assert_eq!(err.kind(), ErrorKind::Index);

        // still stale: nothing was rebuilt
        let err = load_index(&mut container, &data_path).err().unwrap();
        assert!(matches!(err, Error::StaleIndex { .. }));
    }

    #[test]
    fn test_fresh_index_on_disk_loads() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("reads.mem");
        let now = SystemTime::now();

        let mut container = populated();
        let index_path = container.build_index(&data_path, None).unwrap();
        touch(&data_path, now - Duration::from_secs(3600));
        touch(&index_path, now);

        assert!(load_index(&mut container, &data_path).is_ok());
    }

    #[test]
    fn test_build_failure_is_fatal() {
        let mut container = MemoryContainer::new(["chr1"]);
        for pos in [30, 10] {
            container
                .push(RawRecord::Packed(PackedRecord {
                    ref_id: 0,
                    pos,
                    flag: 0,
                    ..PackedRecord::default()
                }))
                .unwrap();
        }

        let err = ensure_index(
            &mut container,
            Path::new("unsorted"),
            &IndexOptions::build_if_missing(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::IndexBuild { .. }));
    }

    /// Builds succeed but never produce a loadable index
    struct Forgetful {
        builds: usize,
    }

    impl Container for Forgetful {
        type Index = ();
        type Query = ();

        const INDEX_EXTENSIONS: &'static [&'static str] = &["idx"];

        fn header(&self) -> Option<&Header> {
            None
        }

        fn write_header(&mut self, _header: &Header) -> Result<()> {
            Ok(())
        }

        fn read_raw(&mut self) -> Result<Option<RawRecord>> {
            Ok(None)
        }

        fn write_raw(&mut self, _record: &RawRecord) -> Result<()> {
            Ok(())
        }

        fn locate_index(&self, _data_path: &Path) -> Option<PathBuf> {
            None
        }

        fn load_index(&mut self, _index_path: &Path) -> Result<Option<()>> {
            Ok(None)
        }

        fn build_index(&mut self, data_path: &Path, _min_shift: Option<u8>) -> Result<PathBuf> {
            self.builds += 1;
            Ok(data_path.with_extension("idx"))
        }

        fn contigs(&self, _index: &()) -> Vec<String> {
            Vec::new()
        }

        fn query(&mut self, _index: &(), _region: &Region) -> Result<()> {
            Ok(())
        }

        fn advance(&mut self, _query: &mut ()) -> Result<Option<RawRecord>> {
            Ok(None)
        }

        fn finish(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_retry_after_build_happens_once() {
        let mut container = Forgetful { builds: 0 };
        let err = ensure_index(
            &mut container,
            Path::new("/nonexistent/reads.bam"),
            &IndexOptions::build_if_missing(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::IndexNotFound(_)));
        assert_eq!(container.builds, 1);
    }
}
