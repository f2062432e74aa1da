fn main() {
    if !cfg!(target_os = "linux") {
        panic!("{} only works on linux", env!("CARGO_PKG_NAME"));
    }
}
