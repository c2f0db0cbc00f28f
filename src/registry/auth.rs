use crate::{errors::AuthError, image::Repository, registry::DefaultRegistry};
use regex::Regex;
use reqwest::{header, RequestBuilder, StatusCode, Url};
use std::{
    fmt,
    time::{Duration, Instant},
};

/// Short-lived bearer credential for pulling from one repository
///
/// Lives for one invocation and is never written anywhere.
#[derive(Clone)]
pub struct Token {
    bearer: String,
    expires_in: Duration,
    issued_at: Option<String>,
    received_at: Instant,
}

/// Token servers that leave out `expires_in` mean sixty seconds
const DEFAULT_EXPIRES_IN: u64 = 60;

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    issued_at: Option<String>,
}

impl Token {
    /// A token for registries that allow pulls without one
    pub fn anonymous() -> Self {
        Token {
            bearer: String::new(),
            expires_in: Duration::from_secs(u64::MAX),
            issued_at: None,
            received_at: Instant::now(),
        }
    }

    /// Decode a token server response body
    pub fn from_json(body: &[u8]) -> Result<Self, AuthError> {
        let response: TokenResponse = serde_json::from_slice(body)?;
        let bearer = response
            .token
            .filter(|t| !t.is_empty())
            .or(response.access_token.filter(|t| !t.is_empty()))
            .ok_or(AuthError::MissingToken)?;
        Ok(Token {
            bearer,
            expires_in: Duration::from_secs(response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN)),
            issued_at: response.issued_at,
            received_at: Instant::now(),
        })
    }

    pub fn bearer(&self) -> &str {
        &self.bearer
    }

    pub fn is_anonymous(&self) -> bool {
        self.bearer.is_empty()
    }

    /// Lifetime the token server granted
    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    /// Issue time as reported by the token server, unparsed
    pub fn issued_at(&self) -> Option<&str> {
        self.issued_at.as_deref()
    }

    /// Has the granted lifetime elapsed since we received this token?
    pub fn is_expired(&self) -> bool {
        self.received_at.elapsed() >= self.expires_in
    }

    /// Attach this token to a request as a bearer credential
    pub fn include_in(&self, req: RequestBuilder) -> RequestBuilder {
        if self.is_anonymous() {
            req
        } else {
            req.bearer_auth(&self.bearer)
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("anonymous", &self.is_anonymous())
            .field("expires_in", &self.expires_in)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Request a pull-scoped token for one repository
///
/// Reference: <https://docs.docker.com/registry/spec/auth/token/>
pub(crate) async fn authenticate(
    req: &reqwest::Client,
    registry: &DefaultRegistry,
    repository: &Repository,
) -> Result<Token, AuthError> {
    let (realm, service) = match &registry.token_url {
        Some(url) => (url.clone(), registry.service.clone()),
        None => match discover(req, registry).await? {
            Some(challenge) => (challenge.realm, challenge.service),
            None => {
                log::debug!("{} allows pulls without a token", registry.registry_url);
                return Ok(Token::anonymous());
            }
        },
    };

    let mut query = Vec::new();
    if let Some(service) = service {
        query.push(("service", service));
    }
    query.push(("scope", registry.pull_scope(repository)));
    log::debug!("requesting token for {} from {}", repository, realm);

    let response = req.get(realm).query(&query).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Status {
            status,
            url: response.url().clone(),
        });
    }
    let body = response.bytes().await?;
    let token = Token::from_json(&body)?;
    log::debug!("received token for {}, {:?}", repository, token);
    Ok(token)
}

/// Ask the registry how it wants us to authenticate
///
/// Returns `None` if the registry answers its version check without asking
/// for credentials.
async fn discover(
    req: &reqwest::Client,
    registry: &DefaultRegistry,
) -> Result<Option<BearerChallenge>, AuthError> {
    let response = req.get(&registry.version_url()).send().await?;
    match response.status() {
        status if status.is_success() => Ok(None),
        StatusCode::UNAUTHORIZED => {
            let auth_header = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("");
            let challenge = BearerChallenge::parse(auth_header)?;
            log::debug!("login challenge for {}, {:?}", registry.registry_url, challenge);
            if challenge.realm.scheme() == "http" && registry.registry_url.scheme() == "https" {
                return Err(AuthError::InsecureRealm {
                    realm: challenge.realm,
                    registry: registry.registry_url.clone(),
                });
            }
            Ok(Some(challenge))
        }
        status => Err(AuthError::Challenge {
            status,
            url: response.url().clone(),
        }),
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct BearerChallenge {
    realm: Url,
    service: Option<String>,
}

impl BearerChallenge {
    fn parse(auth_header: &str) -> Result<Self, AuthError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(concat!(
                "^\\s*",
                "(?i:bearer)",   // Case-insensitive challenge type
                "(?:",           // multiple unordered parameters
                /* */ "\\s*",
                /* */ "(?:",
                /* -- */ "(?:service=\"(?P<service>",
                /* -- -- */ r"[\x20-\x21\x23-\x5B\x5D-\x7E]*", // allowed chars from RFC 6750
                /* -- */ ")\")|",
                /* -- */ "(?:scope=\"",
                /* -- -- */ r"[\x20-\x21\x23-\x5B\x5D-\x7E]*",
                /* -- */ "\")|",
                /* -- */ "(?:realm=\"(?P<realm>",
                /* -- -- */ "https?://",
                /* -- -- */ r"[\x21\x23-\x5B\x5D-\x7E]+",
                /* -- */ ")\")",
                /* */ ")",
                /* */ ",?",      // to keep the parser regular, commas are all optional
                ")*$",
            ))
            .unwrap();
        }
        let captures = RE.captures(auth_header);
        let realm = captures
            .as_ref()
            .and_then(|c| c.name("realm"))
            .and_then(|m| m.as_str().parse::<Url>().ok());
        match realm {
            Some(realm) => Ok(BearerChallenge {
                realm,
                service: captures
                    .as_ref()
                    .and_then(|c| c.name("service"))
                    .map(|m| m.as_str().to_owned()),
            }),
            None => Err(AuthError::UnsupportedAuthentication(
                auth_header.to_string(),
            )),
        }
    }
}
