/// IMAP command parsing

/// Closed set of commands the session understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Capability,
    Noop,
    Logout,
    Login,
    Authenticate,
    List,
    Lsub,
    Status,
    Select,
    Examine,
    Close,
    Expunge,
    Fetch,
    Store,
    Search,
    Uid,
}

impl CommandKind {
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_uppercase().as_str() {
            "CAPABILITY" => CommandKind::Capability,
            "NOOP" => CommandKind::Noop,
            "LOGOUT" => CommandKind::Logout,
            "LOGIN" => CommandKind::Login,
            "AUTHENTICATE" => CommandKind::Authenticate,
            "LIST" => CommandKind::List,
            "LSUB" => CommandKind::Lsub,
            "STATUS" => CommandKind::Status,
            "SELECT" => CommandKind::Select,
            "EXAMINE" => CommandKind::Examine,
            "CLOSE" => CommandKind::Close,
            "EXPUNGE" => CommandKind::Expunge,
            "FETCH" => CommandKind::Fetch,
            "STORE" => CommandKind::Store,
            "SEARCH" => CommandKind::Search,
            "UID" => CommandKind::Uid,
            _ => return None,
        };
        Some(kind)
    }
}

/// Parsed IMAP command
#[derive(Debug, Clone)]
pub struct ImapCommand {
    pub tag: String,
    pub name: String,
    pub args: Vec<String>,
}

impl ImapCommand {
    /// Parse an IMAP command line.
    ///
    /// Quoted strings become a single argument without their quotes (an empty
    /// quoted string is kept as an empty argument).
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let mut parts = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut in_quotes = false;
        let mut chars = line.chars();

        while let Some(c) = chars.next() {
            match c {
                '"' => {
                    in_quotes = !in_quotes;
                    quoted = true;
                }
                '\\' if in_quotes => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                ' ' if !in_quotes => {
                    if !current.is_empty() || quoted {
                        parts.push(std::mem::take(&mut current));
                    }
                    quoted = false;
                }
                _ => current.push(c),
            }
        }

        if !current.is_empty() || quoted {
            parts.push(current);
        }

        if parts.len() < 2 {
            return None;
        }

        let tag = parts.remove(0);
        let name = parts.remove(0).to_uppercase();

        Some(ImapCommand {
            tag,
            name,
            args: parts,
        })
    }

    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::parse(&self.name)
    }
}

/// Size of a synchronizing literal announced at the end of a line (`{n}` or `{n+}`)
pub fn trailing_literal(line: &str) -> Option<(usize, usize)> {
    let open = line.rfind('{')?;
    let inner = line[open + 1..].strip_suffix('}')?;
    let inner = inner.strip_suffix('+').unwrap_or(inner);
    inner.parse().ok().map(|n| (open, n))
}

/// Quote a string so the tokenizer reads it back as one argument
pub fn quote_argument(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// One element of a sequence set; `None` stands for `*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeqRange {
    Single(Option<u32>),
    Range(Option<u32>, Option<u32>),
}

/// Sequence set for FETCH/STORE/SEARCH (e.g. "1:3,5,*")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSet(Vec<SeqRange>);

impl SequenceSet {
    /// Parse a sequence set string (e.g., "1", "1:5", "1:*", "*", "1,3:4")
    pub fn parse(s: &str) -> Option<Self> {
        fn number(s: &str) -> Option<Option<u32>> {
            if s == "*" {
                return Some(None);
            }
            match s.parse::<u32>() {
                Ok(0) | Err(_) => None,
                Ok(n) => Some(Some(n)),
            }
        }

        let mut result = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if let Some((start, end)) = part.split_once(':') {
                result.push(SeqRange::Range(number(start)?, number(end)?));
            } else {
                result.push(SeqRange::Single(number(part)?));
            }
        }

        if result.is_empty() {
            None
        } else {
            Some(SequenceSet(result))
        }
    }

    /// Check if `n` is in the set, `*` standing for `max`
    pub fn contains(&self, n: u32, max: u32) -> bool {
        let resolve = |v: Option<u32>| v.unwrap_or(max);
        self.0.iter().any(|range| match *range {
            SeqRange::Single(v) => n == resolve(v),
            SeqRange::Range(a, b) => {
                let (a, b) = (resolve(a), resolve(b));
                n >= a.min(b) && n <= a.max(b)
            }
        })
    }

    /// Expand into sorted, de-duplicated numbers within 1..=max
    pub fn expand(&self, max: u32) -> Vec<u32> {
        (1..=max).filter(|n| self.contains(*n, max)).collect()
    }
}

/// Section of a BODY[...] fetch item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodySection {
    Full,
    Header,
    HeaderFields(Vec<String>),
    Text,
}

impl BodySection {
    fn parse(section: &str) -> Self {
        let upper = section.trim().to_ascii_uppercase();
        if upper.is_empty() {
            return BodySection::Full;
        }
        if upper == "HEADER" {
            return BodySection::Header;
        }
        if upper == "TEXT" || upper == "1" {
            return BodySection::Text;
        }
        if let Some(rest) = upper.strip_prefix("HEADER.FIELDS") {
            if rest.starts_with(".NOT") {
                return BodySection::Header;
            }
            let fields = rest
                .trim()
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split_whitespace()
                .map(|f| f.to_string())
                .collect();
            return BodySection::HeaderFields(fields);
        }
        BodySection::Full
    }
}

/// A BODY[...] request together with the section text to echo back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyRequest {
    pub section: BodySection,
    pub label: String,
    /// A `<origin.count>` suffix was given
    pub partial: bool,
}

/// FETCH data items to retrieve
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchItems {
    pub flags: bool,
    pub uid: bool,
    pub envelope: bool,
    pub internal_date: bool,
    pub body_structure: bool,
    pub rfc822: bool,
    pub rfc822_size: bool,
    pub rfc822_header: bool,
    pub rfc822_text: bool,
    /// BODY[...] and BODY.PEEK[...] requests, in request order
    pub sections: Vec<BodyRequest>,
}

impl FetchItems {
    /// Parse FETCH item list like "(FLAGS BODY.PEEK[HEADER.FIELDS (FROM)])" or "ALL"
    pub fn parse(s: &str) -> Self {
        let mut items = FetchItems::default();
        let s = s.trim();

        // Handle macros
        match s.to_uppercase().as_str() {
            "ALL" => {
                items.flags = true;
                items.internal_date = true;
                items.rfc822_size = true;
                items.envelope = true;
                return items;
            }
            "FAST" => {
                items.flags = true;
                items.internal_date = true;
                items.rfc822_size = true;
                return items;
            }
            "FULL" => {
                items.flags = true;
                items.internal_date = true;
                items.rfc822_size = true;
                items.envelope = true;
                items.body_structure = true;
                return items;
            }
            _ => {}
        }

        let inner = s
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(s);

        for token in split_items(inner) {
            let upper = token.to_ascii_uppercase();
            if let Some(section) = body_section(&token, &upper) {
                items.sections.push(section);
                continue;
            }
            match upper.as_str() {
                "FLAGS" => items.flags = true,
                "UID" => items.uid = true,
                "ENVELOPE" => items.envelope = true,
                "INTERNALDATE" => items.internal_date = true,
                "BODYSTRUCTURE" | "BODY" => items.body_structure = true,
                "RFC822" => items.rfc822 = true,
                "RFC822.SIZE" => items.rfc822_size = true,
                "RFC822.HEADER" => items.rfc822_header = true,
                "RFC822.TEXT" => items.rfc822_text = true,
                _ => {}
            }
        }

        items
    }

    /// Whether the synthesized message itself is needed
    pub fn needs_body(&self) -> bool {
        self.rfc822
            || self.rfc822_size
            || self.rfc822_header
            || self.rfc822_text
            || self.body_structure
            || !self.sections.is_empty()
    }
}

/// Split on spaces outside of brackets
fn split_items(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in s.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ' ' if depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// BODY[...] / BODY.PEEK[...], noting whether a <partial> suffix follows
fn body_section(token: &str, upper: &str) -> Option<BodyRequest> {
    let start = if upper.starts_with("BODY.PEEK[") {
        10
    } else if upper.starts_with("BODY[") {
        5
    } else {
        return None;
    };
    let end = token.rfind(']')?;
    let section_text = &token[start..end];
    Some(BodyRequest {
        section: BodySection::parse(section_text),
        label: section_text.trim().to_ascii_uppercase(),
        partial: token[end + 1..].trim_start().starts_with('<'),
    })
}

/// How STORE combines the given flags with the current ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreAction {
    pub mode: StoreMode,
    pub silent: bool,
}

impl StoreAction {
    /// Parse "+FLAGS", "-FLAGS.SILENT", "FLAGS", ...
    pub fn parse(s: &str) -> Option<Self> {
        let upper = s.to_ascii_uppercase();
        let (mode, rest) = if let Some(rest) = upper.strip_prefix('+') {
            (StoreMode::Add, rest)
        } else if let Some(rest) = upper.strip_prefix('-') {
            (StoreMode::Remove, rest)
        } else {
            (StoreMode::Replace, upper.as_str())
        };

        let silent = match rest {
            "FLAGS" => false,
            "FLAGS.SILENT" => true,
            _ => return None,
        };
        Some(StoreAction { mode, silent })
    }
}

/// One SEARCH criterion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    All,
    Seen,
    Unseen,
    Answered,
    Unanswered,
    Deleted,
    Undeleted,
    Flagged,
    Unflagged,
    Draft,
    Undraft,
    New,
    Old,
    Recent,
    Subject(String),
    From(String),
    To(String),
    Body(String),
    Text(String),
    Uid(SequenceSet),
    Sequence(SequenceSet),
    Not(Box<SearchKey>),
    Or(Box<SearchKey>, Box<SearchKey>),
    /// Recognised syntax the gateway does not evaluate; matches everything
    Unsupported(String),
}

/// Keys taking one argument that are accepted but not evaluated
const UNEVALUATED_WITH_ARG: &[&str] = &[
    "BEFORE",
    "ON",
    "SINCE",
    "SENTBEFORE",
    "SENTON",
    "SENTSINCE",
    "LARGER",
    "SMALLER",
    "CC",
    "BCC",
    "KEYWORD",
    "UNKEYWORD",
];

impl SearchKey {
    /// Parse the arguments of SEARCH into an AND-list of keys
    pub fn parse_all(args: &[String]) -> Result<Vec<SearchKey>, String> {
        let tokens: Vec<String> = args
            .iter()
            .map(|a| a.trim_matches(|c| c == '(' || c == ')').to_string())
            .filter(|a| !a.is_empty())
            .collect();

        let mut iter = tokens.into_iter().peekable();
        let mut keys = Vec::new();

        // CHARSET is accepted and ignored
        if iter
            .peek()
            .is_some_and(|t| t.eq_ignore_ascii_case("CHARSET"))
        {
            iter.next();
            iter.next();
        }

        while iter.peek().is_some() {
            keys.push(Self::parse_one(&mut iter)?);
        }
        Ok(keys)
    }

    fn parse_one<I: Iterator<Item = String>>(tokens: &mut I) -> Result<SearchKey, String> {
        let token = tokens.next().ok_or("missing search key")?;
        let arg = |tokens: &mut I, key: &str| {
            tokens
                .next()
                .ok_or_else(|| format!("{} requires an argument", key))
        };

        let upper = token.to_ascii_uppercase();
        let key = match upper.as_str() {
            "ALL" => SearchKey::All,
            "SEEN" => SearchKey::Seen,
            "UNSEEN" => SearchKey::Unseen,
            "ANSWERED" => SearchKey::Answered,
            "UNANSWERED" => SearchKey::Unanswered,
            "DELETED" => SearchKey::Deleted,
            "UNDELETED" => SearchKey::Undeleted,
            "FLAGGED" => SearchKey::Flagged,
            "UNFLAGGED" => SearchKey::Unflagged,
            "DRAFT" => SearchKey::Draft,
            "UNDRAFT" => SearchKey::Undraft,
            "NEW" => SearchKey::New,
            "OLD" => SearchKey::Old,
            "RECENT" => SearchKey::Recent,
            "SUBJECT" => SearchKey::Subject(arg(tokens, "SUBJECT")?),
            "FROM" => SearchKey::From(arg(tokens, "FROM")?),
            "TO" => SearchKey::To(arg(tokens, "TO")?),
            "BODY" => SearchKey::Body(arg(tokens, "BODY")?),
            "TEXT" => SearchKey::Text(arg(tokens, "TEXT")?),
            "UID" => {
                let set = arg(tokens, "UID")?;
                SearchKey::Uid(SequenceSet::parse(&set).ok_or("invalid UID set")?)
            }
            "NOT" => SearchKey::Not(Box::new(Self::parse_one(tokens)?)),
            "OR" => {
                let left = Self::parse_one(tokens)?;
                let right = Self::parse_one(tokens)?;
                SearchKey::Or(Box::new(left), Box::new(right))
            }
            "HEADER" => {
                arg(tokens, "HEADER")?;
                arg(tokens, "HEADER")?;
                SearchKey::Unsupported(upper)
            }
            other if UNEVALUATED_WITH_ARG.contains(&other) => {
                arg(tokens, other)?;
                SearchKey::Unsupported(upper)
            }
            _ => match SequenceSet::parse(&token) {
                Some(set) => SearchKey::Sequence(set),
                None => SearchKey::Unsupported(upper),
            },
        };
        Ok(key)
    }
}
