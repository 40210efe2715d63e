use std::env;
use std::fs::File;
use std::io::Write;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-env-changed=MVLIST_DEFAULT_THREADS");

    let out_dir = env::var("OUT_DIR").expect("no out directory");
    let dest = Path::new(&out_dir).join("build_constants.rs");

    let mut file = File::create(&dest).expect("could not create file");

    let capacity: usize = env::var("MVLIST_DEFAULT_THREADS")
        .map_or(Ok(16), |var| var.parse())
        .expect("failed to parse env variable MVLIST_DEFAULT_THREADS");

    if capacity == 0 {
        panic!("invalid MVLIST_DEFAULT_THREADS value (0)");
    }

    write!(&mut file, "pub(crate) const DEFAULT_THREAD_CAPACITY: usize = {};", capacity)
        .expect("could not write to file");
}
