//! Test support.
//!
//! This module contains helpers shared by the tests of several modules.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Builds a `.tar.gz` with the given files (name, mode, content) below the given top-level directory.
pub(crate) fn build_tar_gz(path: &Path, top: &str, files: &[(&str, u32, &str)]) {
    let file = File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::fast()));
    for (name, mode, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, format!("{top}/{name}"), content.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Builds a `.zip` with the given files (name, mode, content) below the given top-level directory.
pub(crate) fn build_zip(path: &Path, top: &str, files: &[(&str, u32, &str)]) {
    let file = File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, mode, content) in files {
        let options = zip::write::SimpleFileOptions::default().unix_permissions(*mode);
        writer.start_file(format!("{top}/{name}"), options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

/// Returns a `bin/java` script that reports the given version the way `java -version` does (on stderr). On stdout it
/// echoes the given anchor variable as `<anchor>=<value>`.
pub(crate) fn fake_java(version: &str, anchor: &str) -> String {
    format!(
        "#!/bin/sh\n\
         echo 'openjdk version \"{version}\" 2022-01-18 LTS' >&2\n\
         echo 'OpenJDK Runtime Environment Zulu17.32+13-CA (build {version}+8-LTS)' >&2\n\
         echo \"{anchor}=${anchor}\"\n"
    )
}

/// Builds a `.tar.gz` java package reporting the given version and echoing the given anchor variable.
pub(crate) fn build_fake_jdk(path: &Path, version: &str, anchor: &str) {
    let java = fake_java(version, anchor);
    let release = format!("JAVA_VERSION=\"{version}\"\n");
    build_tar_gz(path, &format!("jdk-{version}"), &[("bin/java", 0o755, java.as_str()), ("release", 0o644, release.as_str())]);
}
