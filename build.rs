fn main() {
    // Host builds (tests, fuzz) have nothing to generate; the ESP-IDF
    // toolchain environment is only exported for firmware builds.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
