/// A `?` or `?N` marker found outside literals and comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Marker<'a> {
    /// Byte offset of the `?`.
    pub start: usize,
    /// Byte offset just past the marker (and its digits, if any).
    pub end: usize,
    /// The explicit number of a `?N` marker.
    pub digits: Option<&'a str>,
}

/// Walks SQL text and yields placeholder markers, stepping over string and
/// identifier literals, `--` and nested `/* */` comments, and `$tag$` bodies.
pub(super) struct Markers<'a> {
    sql: &'a str,
    pos: usize,
}

impl<'a> Markers<'a> {
    pub(super) fn new(sql: &'a str) -> Self {
        Self { sql, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.sql.as_bytes()
    }

    fn at(&self, offset: usize) -> Option<u8> {
        self.bytes().get(self.pos + offset).copied()
    }

    /// Advance past a literal closed by `quote`; a doubled quote is an escape.
    fn skip_quoted(&mut self, quote: u8) {
        self.pos += 1;
        while let Some(b) = self.at(0) {
            self.pos += 1;
            if b == quote {
                if self.at(0) == Some(quote) {
                    self.pos += 1;
                } else {
                    return;
                }
            }
        }
    }

    fn skip_line_comment(&mut self) {
        match self.sql[self.pos..].find('\n') {
            Some(newline) => self.pos += newline + 1,
            None => self.pos = self.sql.len(),
        }
    }

    fn skip_block_comment(&mut self) {
        let mut depth = 0usize;
        while self.pos < self.sql.len() {
            match (self.at(0), self.at(1)) {
                (Some(b'/'), Some(b'*')) => {
                    depth += 1;
                    self.pos += 2;
                }
                (Some(b'*'), Some(b'/')) => {
                    depth -= 1;
                    self.pos += 2;
                    if depth == 0 {
                        return;
                    }
                }
                _ => self.pos += 1,
            }
        }
    }

    /// If a `$tag$` opener starts here, skip to the end of its closing tag.
    fn skip_dollar_quoted(&mut self) -> bool {
        let rest = &self.bytes()[self.pos + 1..];
        let tag_len = rest
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count();
        if rest.get(tag_len) != Some(&b'$') {
            return false;
        }
        let delimiter = &self.sql[self.pos..self.pos + tag_len + 2];
        let body_start = self.pos + delimiter.len();
        self.pos = match self.sql[body_start..].find(delimiter) {
            Some(close) => body_start + close + delimiter.len(),
            None => self.sql.len(),
        };
        true
    }
}

impl<'a> Iterator for Markers<'a> {
    type Item = Marker<'a>;

    fn next(&mut self) -> Option<Marker<'a>> {
        while let Some(b) = self.at(0) {
            match (b, self.at(1)) {
                (b'\'' | b'"', _) => self.skip_quoted(b),
                (b'-', Some(b'-')) => self.skip_line_comment(),
                (b'/', Some(b'*')) => self.skip_block_comment(),
                (b'$', _) => {
                    if !self.skip_dollar_quoted() {
                        self.pos += 1;
                    }
                }
                (b'?', _) => {
                    let start = self.pos;
                    let digits_len = self.bytes()[start + 1..]
                        .iter()
                        .take_while(|b| b.is_ascii_digit())
                        .count();
                    let end = start + 1 + digits_len;
                    self.pos = end;
                    let digits = (digits_len > 0).then(|| &self.sql[start + 1..end]);
                    return Some(Marker { start, end, digits });
                }
                _ => self.pos += 1,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starts(sql: &str) -> Vec<usize> {
        Markers::new(sql).map(|m| m.start).collect()
    }

    #[test]
    fn finds_bare_and_numbered_markers() {
        let found: Vec<Marker<'_>> = Markers::new("a = ? and b = ?12").collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].digits, None);
        assert_eq!(found[1].digits, Some("12"));
        assert_eq!(found[1].end, 17);
    }

    #[test]
    fn nested_block_comments_hide_markers() {
        assert_eq!(starts("/* a /* ? */ ? */ ?"), vec![18]);
    }

    #[test]
    fn unterminated_constructs_swallow_the_rest() {
        assert!(starts("select 'oops ?").is_empty());
        assert!(starts("select $body$ ?").is_empty());
        assert!(starts("-- ?").is_empty());
    }

    #[test]
    fn lone_dollar_is_plain_text() {
        assert_eq!(starts("select $1, ?"), vec![11]);
    }
}
