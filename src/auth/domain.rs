use std::collections::HashSet;

pub const DEFAULT_ALLOWED_DOMAINS: [&str; 3] = ["edu.unirio.br", "uniriotec.br", "unirio.br"];

/// Email domain allow-list
#[derive(Debug, Clone)]
pub struct DomainGate {
    allowed: HashSet<String>,
}

impl DomainGate {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: domains
                .into_iter()
                .map(|d| d.as_ref().trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// True when the part after the last `@` is an allowed domain.
    /// Sub-domains of an allowed domain are not accepted.
    pub fn check(&self, email: &str) -> bool {
        match email.trim().rsplit_once('@') {
            Some((local, domain)) if !local.is_empty() => {
                self.allowed.contains(&domain.to_lowercase())
            }
            _ => false,
        }
    }
}

impl Default for DomainGate {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_DOMAINS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_domains() {
        let gate = DomainGate::default();
        assert!(gate.check("a@edu.unirio.br"));
        assert!(gate.check("a@uniriotec.br"));
        assert!(gate.check("a@unirio.br"));
        assert!(!gate.check("a@gmail.com"));
    }

    #[test]
    fn test_rejects_malformed_emails() {
        let gate = DomainGate::default();
        assert!(!gate.check("noatsign"));
        assert!(!gate.check(""));
        assert!(!gate.check("@unirio.br"));
        assert!(!gate.check("a@"));
    }

    #[test]
    fn test_case_insensitive_and_last_at() {
        let gate = DomainGate::default();
        assert!(gate.check("Ana@EDU.UNIRIO.BR"));
        assert!(gate.check("odd@gmail.com@unirio.br"));
        assert!(!gate.check("a@unirio.br@gmail.com"));
    }

    #[test]
    fn test_no_suffix_matching() {
        let gate = DomainGate::default();
        assert!(!gate.check("a@fake-unirio.br"));
        assert!(!gate.check("a@mail.unirio.br"));
    }

    #[test]
    fn test_configured_domains() {
        let gate = DomainGate::new(vec![" Example.EDU ".to_string()]);
        assert!(gate.check("x@example.edu"));
        assert!(!gate.check("x@unirio.br"));
    }
}
