use colored::{Color, Colorize};
use serde::{Deserialize, Serialize};

/// Prints the given string with the given color.
///
/// ## Example
/// ```
/// use planning_through_contact::utils::utils_console::{ptc_print, PrintMode, PrintColor};
/// ptc_print("test", PrintMode::Print, PrintColor::Blue, false);
/// ```
pub fn ptc_print(s: &str, mode: PrintMode, color: PrintColor, bolded: bool) {
    let string = format_console_string(s, &color, bolded);
    match mode {
        PrintMode::Println => { println!("{}", string); }
        PrintMode::Print => { print!("{}", string); }
    }
}

fn format_console_string(s: &str, color: &PrintColor, bolded: bool) -> String {
    let mut out = match color.to_colored_color() {
        None => { s.normal() }
        Some(c) => { s.color(c) }
    };
    if bolded { out = out.bold(); }
    out.to_string()
}

/// Enum that is used in the `ptc_print` function.
/// Println will cause a new line after each line, while Print will not.
#[derive(Clone, Debug)]
pub enum PrintMode {
    Println,
    Print
}

/// Defines color for a console print command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrintColor {
    None,
    Blue,
    Green,
    Red,
    Yellow,
    Cyan,
    Magenta
}
impl PrintColor {
    fn to_colored_color(&self) -> Option<Color> {
        let (r, g, b) = match self {
            PrintColor::None => { return None; }
            PrintColor::Blue => { (0, 0, 255) }
            PrintColor::Green => { (0, 255, 0) }
            PrintColor::Red => { (255, 0, 0) }
            PrintColor::Yellow => { (255, 255, 0) }
            PrintColor::Cyan => { (0, 255, 255) }
            PrintColor::Magenta => { (255, 0, 255) }
        };
        Some(Color::TrueColor { r, g, b })
    }
}

/// Controls whether planner components print human-readable progress to the console.
/// Structured events are always emitted through `tracing`; this flag only adds the colored
/// console summaries on top.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanningDebug {
    True,
    False
}
impl PlanningDebug {
    pub fn is_on(&self) -> bool {
        self == &PlanningDebug::True
    }
    pub fn print(&self, s: &str, color: PrintColor) {
        if self.is_on() { ptc_print(s, PrintMode::Println, color, false); }
    }
}
impl Default for PlanningDebug {
    fn default() -> Self {
        Self::False
    }
}
