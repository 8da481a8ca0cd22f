// Tue Jan 13 2026 - Alex

use colored::*;

pub struct Banner {
    title: String,
    subtitle: Option<String>,
    version: Option<String>,
    use_color: bool,
}

const WIDTH: usize = 60;

impl Banner {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            subtitle: None,
            version: None,
            use_color: true,
        }
    }

    pub fn with_subtitle(mut self, subtitle: &str) -> Self {
        self.subtitle = Some(subtitle.to_string());
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn with_color(mut self, use_color: bool) -> Self {
        self.use_color = use_color;
        self
    }

    pub fn render(&self) -> String {
        let ascii_art = r#"
  ____  __  __ _  ____  __
 / ___||  \/  | |/ /  \/  |
 \___ \| |\/| | ' /| |\/| |
  ___) | |  | | . \| |  | |
 |____/|_|  |_|_|\_\_|  |_|
        "#;

        let mut lines: Vec<String> = ascii_art
            .lines()
            .map(|line| self.paint(line.to_string(), |s| s.cyan().bold()))
            .collect();

        lines.push(self.paint(format!("{:^w$}", self.title, w = WIDTH), |s| s.bold()));

        if let Some(subtitle) = &self.subtitle {
            lines.push(self.paint(format!("{:^w$}", subtitle, w = WIDTH), |s| s.yellow()));
        }
        if let Some(version) = &self.version {
            lines.push(self.paint(format!("{:^w$}", format!("v{}", version), w = WIDTH), |s| s.green()));
        }

        lines.push(String::new());
        lines.join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }

    fn paint(&self, text: String, f: fn(String) -> ColoredString) -> String {
        if self.use_color {
            f(text).to_string()
        } else {
            text
        }
    }
}

impl Default for Banner {
    fn default() -> Self {
        Self::new("SMKM Offset Generator")
            .with_subtitle("Store manager structure offsets for 32-bit Windows")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_color(atty::is(atty::Stream::Stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_render() {
        let rendered = Banner::new("SMKM")
            .with_subtitle("store manager")
            .with_version("1.0.0")
            .with_color(false)
            .render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines.iter().any(|l| l.trim() == "SMKM"));
        assert!(lines.iter().any(|l| l.trim() == "store manager"));
        assert!(lines.iter().any(|l| l.trim() == "v1.0.0"));
        assert!(!rendered.contains('\u{1b}'));
    }

    #[test]
    fn test_centred_to_fixed_width() {
        let rendered = Banner::new("SMKM").with_color(false).render();
        let title = rendered.lines().find(|l| l.contains("SMKM")).unwrap();
        assert_eq!(title.len(), WIDTH);
    }
}
