use std::{ffi::OsStr, path::PathBuf};

pub trait KakeraPathExt {
    /// Append an extra extension after the existing one.
    ///
    /// `video.mp4` with `part` becomes `video.mp4.part`.
    fn with_appended_extension<T: AsRef<OsStr>>(&self, extension: T) -> PathBuf;
}

impl KakeraPathExt for PathBuf {
    fn with_appended_extension<T: AsRef<OsStr>>(&self, extension: T) -> PathBuf {
        let mut path = self.clone().into_os_string();
        path.push(".");
        path.push(extension);
        PathBuf::from(path)
    }
}
