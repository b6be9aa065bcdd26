const MAX_LINE_CHARS: usize = 4096;

#[derive(Clone, Copy)]
enum Escape {
    Start,
    Csi,
    // OSC / DCS style strings run until BEL or ESC '\'.
    String { saw_esc: bool },
}

/// Strip terminal escape sequences and control characters from one line of
/// subprocess output, truncating very long lines.
pub fn sanitize_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LINE_CHARS));
    let mut esc: Option<Escape> = None;
    let mut count = 0usize;

    for c in input.chars() {
        match esc {
            Some(Escape::Start) => {
                esc = match c {
                    '[' => Some(Escape::Csi),
                    ']' | 'P' | 'X' | '^' | '_' => Some(Escape::String { saw_esc: false }),
                    _ => None,
                };
                continue;
            }
            Some(Escape::Csi) => {
                if ('@'..='~').contains(&c) {
                    esc = None;
                }
                continue;
            }
            Some(Escape::String { saw_esc }) => {
                esc = match c {
                    '\x07' => None,
                    '\\' if saw_esc => None,
                    '\x1b' => Some(Escape::String { saw_esc: true }),
                    _ => Some(Escape::String { saw_esc: false }),
                };
                continue;
            }
            None => {}
        }

        match c {
            '\x1b' => {
                esc = Some(Escape::Start);
                continue;
            }
            '\t' => out.push(' '),
            c if c.is_control() || is_bidi_control(c) => continue,
            c => out.push(c),
        }
        count += 1;
        if count >= MAX_LINE_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
    }
    out
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}')
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}
