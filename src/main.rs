fn main() {
    if let Err(err) = pipeline_reconcile::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
