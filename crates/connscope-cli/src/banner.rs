pub fn print_banner() {
    println!();
    println!(
        "  {} {}",
        console::style("connscope").cyan().bold(),
        console::style(format!("v{}", connscope_core::VERSION)).dim(),
    );
    println!(
        "  {}",
        console::style("network connection log analysis").white().dim(),
    );
    println!();
}
