//! File-enumeration capability for container elements such as `<fileset>`.

use std::collections::BTreeSet;
use std::path::PathBuf;

/// Implemented by anything that can enumerate a set of files on demand.
///
/// The registry uses this when a `<classpath>` nests a `<fileset>`: the
/// provider yields the candidate files and the caller filters them down to
/// archive entries. Pattern matching (`include`/`exclude` globs) is not
/// modeled; `excluded` carries paths the caller already ruled out.
pub trait FilesProvider {
    fn files(&self, excluded: &BTreeSet<PathBuf>) -> BTreeSet<PathBuf>;
}
