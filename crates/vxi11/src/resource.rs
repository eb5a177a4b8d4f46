//! VISA-style `TCPIP[n]::host::[sub-address::]INSTR` resource strings.

use std::fmt;
use std::str::FromStr;

use crate::Vxi11Error;

/// A parsed instrument resource string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Interface type, upper-cased (`TCPIP`).
    pub kind: String,
    /// Interface type and board number as written (`TCPIP0`).
    pub prefix: String,
    pub host: String,
    /// Logical sub-device, e.g. `inst0`, `gpib,5` or `usb0[...]`.
    pub sub_address: Option<String>,
    pub suffix: String,
}

impl Resource {
    /// Whether `text` looks like a resource string rather than a bare host name.
    pub fn is_resource(text: &str) -> bool {
        text.get(..5).is_some_and(|kind| kind.eq_ignore_ascii_case("TCPIP")) && text.contains("::")
    }
}

fn plain_token(token: &str) -> bool {
    !token.is_empty() && !token.chars().any(|c| c == ':' || c.is_whitespace())
}

fn valid_sub_address(token: &str) -> bool {
    match token.find('[') {
        Some(open) => {
            let (name, bracket) = token.split_at(open);
            plain_token(name) && bracket.len() > 2 && bracket.ends_with(']')
        }
        None => plain_token(token),
    }
}

impl FromStr for Resource {
    type Err = Vxi11Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || Vxi11Error::InvalidResource(text.to_string());

        let (prefix, rest) = text.split_once("::").ok_or_else(invalid)?;
        let (Some(kind), Some(board)) = (prefix.get(..5), prefix.get(5..)) else {
            return Err(invalid());
        };
        if !kind.eq_ignore_ascii_case("TCPIP") || !board.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let (body, suffix) = rest.rsplit_once("::").ok_or_else(invalid)?;
        if !suffix.eq_ignore_ascii_case("INSTR") {
            return Err(invalid());
        }

        // The sub-address may carry "::" inside its brackets, so only the
        // first separator splits host from sub-address.
        let (host, sub_address) = match body.split_once("::") {
            Some((host, sub)) => (host, Some(sub)),
            None => (body, None),
        };
        if !plain_token(host) {
            return Err(invalid());
        }
        if let Some(sub) = sub_address {
            if !valid_sub_address(sub) {
                return Err(invalid());
            }
        }

        Ok(Self {
            kind: kind.to_ascii_uppercase(),
            prefix: prefix.to_string(),
            host: host.to_string(),
            sub_address: sub_address.map(str::to_string),
            suffix: suffix.to_string(),
        })
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::", self.prefix, self.host)?;
        if let Some(sub) = &self.sub_address {
            write!(f, "{sub}::")?;
        }
        f.write_str(&self.suffix)
    }
}
