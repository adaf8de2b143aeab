fn main() {
    if let Err(err) = netsec_cloud::cli::run() {
        netsec_cloud::ui::eprintln_error(&err);
        std::process::exit(netsec_cloud::exit::exit_code(&err));
    }
}
