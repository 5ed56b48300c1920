fn main() {
    if let Err(err) = sales_reconcile::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
