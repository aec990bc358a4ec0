use squish::package::{
  create_package, extract_package, read_details, PackOptions, PackageError, SIGNATURE,
};
use std::{fs, path::PathBuf};

/// A fresh scratch directory under the system temp dir; removed by
/// [`Scratch::drop`] so failed assertions still clean up.
struct Scratch(PathBuf);
impl Scratch {
  fn new(tag: &str) -> Self {
    let salt = super::rand_bytes(8);
    let salt: String = salt.iter().map(|b| format!("{b:02x}")).collect();
    let dir = std::env::temp_dir().join(format!("squish_{tag}_{salt}"));
    fs::create_dir_all(&dir).unwrap();
    Self(dir)
  }

  fn path(&self, rel: &str) -> PathBuf {
    self.0.join(rel)
  }

  fn write(&self, rel: &str, bytes: &[u8]) {
    let p = self.path(rel);
    fs::create_dir_all(p.parent().unwrap()).unwrap();
    fs::write(p, bytes).unwrap();
  }
}
impl Drop for Scratch {
  fn drop(&mut self) {
    let _ = fs::remove_dir_all(&self.0);
  }
}

#[test]
fn test_two_file_package_layout_and_round_trip() {
  let scratch = Scratch::new("two_file");
  scratch.write("src/a.txt", b"hello");
  scratch.write("src/dir/b.bin", &[0x00, 0xFF, 0x42]);

  let opts = PackOptions {
    version: 77,
    timestamp: 131_000_000_000_000_000,
    notes: "two little files".to_string(),
    ..PackOptions::default()
  };
  let target = scratch.path("out.pack");
  let count = create_package(&target, &scratch.path("src"), &opts).unwrap();
  assert_eq!(count, 2);

  let bytes = fs::read(&target).unwrap();
  // the fixed signature: "(CIDPack) V1"
  assert_eq!(&bytes[..12], &[0x28, 0x43, 0x49, 0x44, 0x50, 0x61, 0x63, 0x6B, 0x29, 0x20, 0x56, 0x31]);
  assert_eq!(&bytes[..12], &SIGNATURE);

  let details = read_details(&target).unwrap();
  assert_eq!(details.file_count, 2);
  assert_eq!(details.version, 77);
  assert_eq!(details.timestamp, 131_000_000_000_000_000);
  assert_eq!(details.notes, "two little files");

  let header = extract_package(&target, &scratch.path("restored"), false).unwrap();
  assert_eq!(header.file_count, 2);
  assert_eq!(fs::read(scratch.path("restored/a.txt")).unwrap(), b"hello");
  assert_eq!(fs::read(scratch.path("restored/dir/b.bin")).unwrap(), &[0x00, 0xFF, 0x42]);
}

#[test]
fn test_deep_tree_with_mixed_content_round_trips() {
  let scratch = Scratch::new("tree");
  let compressible = b"the same line over and over\n".repeat(4000);
  let incompressible = super::rand_bytes(150_000);
  scratch.write("src/empty.dat", b"");
  scratch.write("src/readme.txt", &compressible);
  scratch.write("src/nested/deep/noise.bin", &incompressible);
  scratch.write("src/nested/one.txt", b"1");

  let target = scratch.path("bundle.pack");
  let count = create_package(&target, &scratch.path("src"), &PackOptions::default()).unwrap();
  assert_eq!(count, 4);

  // the compressible text must actually have shrunk the package
  let package_len = fs::metadata(&target).unwrap().len() as usize;
  assert!(package_len < compressible.len() + incompressible.len());
  // and the incompressible payload must be stored raw, not inflated
  assert!(package_len > incompressible.len());

  extract_package(&target, &scratch.path("out"), false).unwrap();
  assert_eq!(fs::read(scratch.path("out/empty.dat")).unwrap(), b"");
  assert_eq!(fs::read(scratch.path("out/readme.txt")).unwrap(), compressible);
  assert_eq!(fs::read(scratch.path("out/nested/deep/noise.bin")).unwrap(), incompressible);
  assert_eq!(fs::read(scratch.path("out/nested/one.txt")).unwrap(), b"1");
}

#[test]
fn test_target_inside_source_is_refused() {
  let scratch = Scratch::new("inside");
  scratch.write("src/a.txt", b"x");
  let result =
    create_package(&scratch.path("src/out.pack"), &scratch.path("src"), &PackOptions::default());
  assert!(matches!(result, Err(PackageError::TargetInsideSource)));
}

#[test]
fn test_sibling_directory_with_prefix_name_is_fine() {
  // "srcOUT" merely starts with the letters of "src"; a string-prefix
  // check would wrongly refuse this
  let scratch = Scratch::new("sibling");
  scratch.write("src/a.txt", b"x");
  fs::create_dir_all(scratch.path("srcOUT")).unwrap();
  let result =
    create_package(&scratch.path("srcOUT/out.pack"), &scratch.path("src"), &PackOptions::default());
  assert!(result.is_ok(), "{result:?}");
}

#[test]
fn test_overwrite_flags() {
  let scratch = Scratch::new("overwrite");
  scratch.write("src/a.txt", b"v1");
  let target = scratch.path("out.pack");

  create_package(&target, &scratch.path("src"), &PackOptions::default()).unwrap();
  let again = create_package(&target, &scratch.path("src"), &PackOptions::default());
  assert!(matches!(again, Err(PackageError::TargetExists)));
  let opts = PackOptions { overwrite: true, ..PackOptions::default() };
  create_package(&target, &scratch.path("src"), &opts).unwrap();

  extract_package(&target, &scratch.path("out"), false).unwrap();
  let again = extract_package(&target, &scratch.path("out"), false);
  assert!(matches!(again, Err(PackageError::TargetExists)));
  extract_package(&target, &scratch.path("out"), true).unwrap();
}

#[test]
fn test_corrupted_payload_fails_the_hash_check() {
  let scratch = Scratch::new("corrupt");
  // small random file: deflate can't shrink it, so it's stored raw and
  // its payload is the tail of the package
  scratch.write("src/noise.bin", &super::rand_bytes(100));
  let target = scratch.path("out.pack");
  create_package(&target, &scratch.path("src"), &PackOptions::default()).unwrap();

  let mut bytes = fs::read(&target).unwrap();
  let last = bytes.len() - 1;
  bytes[last] ^= 0xFF;
  fs::write(&target, &bytes).unwrap();

  let result = extract_package(&target, &scratch.path("out"), false);
  assert!(matches!(result, Err(PackageError::HashMismatch)), "{result:?}");
}

#[test]
fn test_truncated_package_is_an_io_error() {
  let scratch = Scratch::new("truncated");
  scratch.write("src/a.txt", b"some file content that makes the package non-trivial");
  let target = scratch.path("out.pack");
  create_package(&target, &scratch.path("src"), &PackOptions::default()).unwrap();

  let bytes = fs::read(&target).unwrap();
  fs::write(&target, &bytes[..bytes.len() - 10]).unwrap();
  let result = extract_package(&target, &scratch.path("out"), false);
  assert!(matches!(result, Err(PackageError::Io(_))), "{result:?}");
}

#[test]
fn test_garbage_input_is_not_a_package() {
  let scratch = Scratch::new("garbage");
  scratch.write("junk.bin", b"this is not a package at all, not even close");
  let result = read_details(&scratch.path("junk.bin"));
  assert!(matches!(result, Err(PackageError::NotAPackage)));
}

#[test]
fn test_hostile_member_paths_cannot_escape() {
  // hand-build a package whose single record points outside the target
  let scratch = Scratch::new("hostile");
  scratch.write("src/a.txt", b"payload");
  let target = scratch.path("out.pack");
  create_package(&target, &scratch.path("src"), &PackOptions::default()).unwrap();

  let bytes = fs::read(&target).unwrap();
  // the stored path "a.txt" appears as UTF-16LE; splice in "../x!" of
  // the same length
  let needle: Vec<u8> = "a.txt".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
  let evil: Vec<u8> = "../x!".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
  let at = bytes.windows(needle.len()).position(|w| w == needle).unwrap();
  let mut patched = bytes.clone();
  patched[at..at + evil.len()].copy_from_slice(&evil);
  fs::write(&target, &patched).unwrap();

  let result = extract_package(&target, &scratch.path("out"), false);
  assert!(matches!(result, Err(PackageError::UnsafeRelativePath)), "{result:?}");
}

#[test]
fn test_files_extract_in_recorded_order_with_dirs_recreated() {
  let scratch = Scratch::new("order");
  scratch.write("src/z/last.txt", b"z");
  scratch.write("src/a/first.txt", b"a");
  scratch.write("src/middle.txt", b"m");

  let target = scratch.path("out.pack");
  create_package(&target, &scratch.path("src"), &PackOptions::default()).unwrap();
  extract_package(&target, &scratch.path("out"), false).unwrap();

  assert!(scratch.path("out/a/first.txt").is_file());
  assert!(scratch.path("out/middle.txt").is_file());
  assert!(scratch.path("out/z/last.txt").is_file());
}

#[test]
fn test_unicode_file_names_survive() {
  let scratch = Scratch::new("unicode");
  scratch.write("src/снимок.bin", &[1, 2, 3]);
  scratch.write("src/目录/файл.txt", b"mixed");

  let target = scratch.path("out.pack");
  create_package(&target, &scratch.path("src"), &PackOptions::default()).unwrap();
  extract_package(&target, &scratch.path("out"), false).unwrap();
  assert_eq!(fs::read(scratch.path("out/снимок.bin")).unwrap(), &[1, 2, 3]);
  assert_eq!(fs::read(scratch.path("out/目录/файл.txt")).unwrap(), b"mixed");
}
