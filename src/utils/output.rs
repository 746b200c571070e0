// Colored terminal output helpers
use colored::Colorize;

pub fn print_success(msg: &str) {
    println!("{} {}", "ok".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "error".red(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "*".blue(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "warning".yellow(), msg);
}

pub fn print_debug(verbose: bool, msg: &str) {
    if verbose {
        println!("{} {}", "debug".cyan(), msg);
    }
}
