/// Where commands write human-readable progress.
///
/// With `--json` the document owns stdout, so progress goes elsewhere.
pub trait UserOutput: Send + Sync {
    fn status(&self, message: &str);

    /// e.g. "Dev services stopped"
    fn success(&self, message: &str);

    /// e.g. "Keeping the previous configuration: ..."
    fn warning(&self, message: &str);

    fn error(&self, message: &str);

    fn blank(&self);
}

/// Progress on stdout, problems on stderr.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn blank(&self) {
        println!();
    }
}

/// Everything on stderr. Used with `--json`.
pub struct StderrOutput;

impl UserOutput for StderrOutput {
    fn status(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn success(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn blank(&self) {
        eprintln!();
    }
}
