fn main() -> Result<(), Box<dyn std::error::Error>> {
    justify::cli::main()
}
