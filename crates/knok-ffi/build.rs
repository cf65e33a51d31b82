fn main() {
    uniffi::generate_scaffolding("src/knok.udl").unwrap();
}
