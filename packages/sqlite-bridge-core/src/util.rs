/// Map a user supplied database name onto a file name that is safe inside the
/// OPFS pool: `[A-Za-z0-9._-]` only, no leading dot, `.db` suffix.
pub fn sanitize_db_filename(name: &str) -> String {
    let mut file: String = name
        .trim()
        .chars()
        .enumerate()
        .map(|(i, c)| match c {
            '.' if i == 0 => '_',
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect();
    if file.is_empty() {
        file.push_str("db");
    }
    if !file.ends_with(".db") {
        file.push_str(".db");
    }
    file
}

/// True when `rest` holds nothing but whitespace and SQL comments. An
/// unterminated block comment counts as content.
pub fn only_whitespace_and_comments(rest: &[u8]) -> bool {
    let mut i = 0usize;
    while i < rest.len() {
        match (rest[i], rest.get(i + 1)) {
            (b' ' | b'\t' | b'\r' | b'\n', _) => i += 1,
            (b'-', Some(b'-')) => {
                i += 2;
                while i < rest.len() && rest[i] != b'\n' {
                    i += 1;
                }
            }
            (b'/', Some(b'*')) => {
                i += 2;
                loop {
                    if i + 1 >= rest.len() {
                        return false;
                    }
                    if rest[i] == b'*' && rest[i + 1] == b'/' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            _ => return false,
        }
    }
    true
}
