/// SMTP commands accepted by the gateway (RFC 5321 subset plus AUTH)
#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    /// HELO <domain>
    Helo(String),
    /// EHLO <domain>
    Ehlo(String),
    /// MAIL FROM:<reverse-path> [SP <mail-parameters>]
    MailFrom {
        address: String,
        parameters: Vec<String>,
    },
    /// RCPT TO:<forward-path> [SP <rcpt-parameters>]
    RcptTo {
        address: String,
        parameters: Vec<String>,
    },
    Data,
    Rset,
    StartTls,
    /// AUTH mechanism [initial-response]
    Auth {
        mechanism: String,
        initial_response: Option<String>,
    },
    Vrfy(String),
    Help,
    Noop,
    Quit,
    /// Known verb with unusable arguments
    Invalid(String),
    /// Unknown command
    Unknown(String),
}

impl SmtpCommand {
    /// Parse one command line (trailing CRLF allowed)
    pub fn parse(input: &str) -> Self {
        let input = input.trim_end_matches(['\r', '\n']);

        let (verb, args) = match input.split_once(' ') {
            Some((verb, args)) => (verb, args.trim()),
            None => (input, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELO" if !args.is_empty() => SmtpCommand::Helo(args.to_string()),
            "EHLO" if !args.is_empty() => SmtpCommand::Ehlo(args.to_string()),
            "HELO" | "EHLO" => SmtpCommand::Invalid(input.to_string()),
            "MAIL" => parse_path_command(args, "FROM:")
                .map(|(address, parameters)| SmtpCommand::MailFrom {
                    address,
                    parameters,
                })
                .unwrap_or_else(|| SmtpCommand::Invalid(input.to_string())),
            "RCPT" => parse_path_command(args, "TO:")
                .filter(|(address, _)| !address.is_empty())
                .map(|(address, parameters)| SmtpCommand::RcptTo {
                    address,
                    parameters,
                })
                .unwrap_or_else(|| SmtpCommand::Invalid(input.to_string())),
            "DATA" => SmtpCommand::Data,
            "RSET" => SmtpCommand::Rset,
            "STARTTLS" => SmtpCommand::StartTls,
            "AUTH" => parse_auth(args).unwrap_or_else(|| SmtpCommand::Invalid(input.to_string())),
            "VRFY" => SmtpCommand::Vrfy(args.to_string()),
            "HELP" => SmtpCommand::Help,
            "NOOP" => SmtpCommand::Noop,
            "QUIT" => SmtpCommand::Quit,
            _ => SmtpCommand::Unknown(input.to_string()),
        }
    }
}

/// AUTH mechanism [initial-response]; "=" stands for an empty initial response
fn parse_auth(args: &str) -> Option<SmtpCommand> {
    let mut parts = args.split_whitespace();
    let mechanism = parts.next()?.to_ascii_uppercase();
    let initial_response = parts.next().map(|s| s.to_string());
    Some(SmtpCommand::Auth {
        mechanism,
        initial_response,
    })
}

/// Parse "FROM:<addr> [params]" / "TO:<addr> [params]".
///
/// Tolerates a space after the colon and a missing pair of angle brackets.
fn parse_path_command(args: &str, keyword: &str) -> Option<(String, Vec<String>)> {
    let head = args.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = args[keyword.len()..].trim_start();

    let (address, params) = if let Some(stripped) = rest.strip_prefix('<') {
        let end = stripped.find('>')?;
        (&stripped[..end], &stripped[end + 1..])
    } else {
        match rest.split_once(' ') {
            Some((address, params)) => (address, params),
            None => (rest, ""),
        }
    };

    let parameters = params.split_whitespace().map(|s| s.to_string()).collect();
    Some((address.trim().to_string(), parameters))
}
