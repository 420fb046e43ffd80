use colored::Colorize;

pub trait Status {
    fn show_status(&mut self, title: &str, subtitle: &str);
    fn show_error(&mut self, title: &str, subtitle: &str);
}

/// Renders status lines on the terminal, collapsing repeated titles.
#[derive(Default)]
pub struct ConsoleStatus {
    title: Option<String>,
}

impl ConsoleStatus {
    fn print_title(&mut self, title: &str) {
        if self.title.as_deref() != Some(title) {
            println!("{}", title.bold());
            self.title = Some(title.to_string());
        }
    }
}

impl Status for ConsoleStatus {
    fn show_status(&mut self, title: &str, subtitle: &str) {
        self.print_title(title);
        println!(" {subtitle}");
    }

    fn show_error(&mut self, title: &str, subtitle: &str) {
        self.title = None;
        eprintln!("{}", title.red().bold());
        eprintln!(" {}", subtitle.red());
    }
}
