//! Domain types for users and transactions, plus the validation that turns
//! raw client input into well-formed records.

use std::fmt::Display;
use std::str::FromStr;

use bcrypt::{hash, verify, BcryptError, DEFAULT_COST};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Alias for the integer type used for database primary keys.
pub type DatabaseID = i64;

/// A newtype wrapper for a user's database ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserID(DatabaseID);

impl UserID {
    pub fn new(id: DatabaseID) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> DatabaseID {
        self.0
    }
}

impl Display for UserID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from validating client-supplied transaction fields.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    /// The transaction type was not one of the recognized values.
    #[error("unrecognized transaction type \"{0}\", expected \"income\" or \"expense\"")]
    InvalidType(String),

    /// The amount could not be parsed as a number.
    #[error("could not parse \"{0}\" as an amount")]
    InvalidAmount(String),

    /// The amount parsed but was negative.
    #[error("transaction amounts must not be negative, got {0}")]
    NegativeAmount(f64),

    /// The amount parsed but was not a finite number. Infinities and NaN
    /// cannot be stored or summed into the monthly report, and they do not
    /// round-trip through JSON as numbers.
    #[error("transaction amounts must be finite numbers, got {0}")]
    NonFiniteAmount(f64),

    /// The date was not a valid calendar date in YYYY-MM-DD form.
    #[error("could not parse \"{0}\" as a date in YYYY-MM-DD format")]
    InvalidDate(String),
}

/// A bcrypt password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Hash a raw password.
    ///
    /// # Errors
    ///
    /// This function will return an error if the password could not be hashed.
    pub fn new(raw_password: &str) -> Result<Self, BcryptError> {
        hash(raw_password, DEFAULT_COST).map(Self)
    }

    /// Create a `PasswordHash` from a string that is already a valid bcrypt hash.
    ///
    /// This should only be called on strings coming out of a trusted source
    /// such as the application's database.
    pub fn new_unchecked(raw_password_hash: String) -> Self {
        Self(raw_password_hash)
    }

    /// Check that `raw_password` matches the stored password.
    pub fn verify(&self, raw_password: &str) -> Result<bool, BcryptError> {
        verify(raw_password, &self.0)
    }
}

impl AsRef<str> for PasswordHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user of the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    id: UserID,
    username: String,
    password_hash: PasswordHash,
}

impl User {
    pub fn new(id: UserID, username: String, password_hash: PasswordHash) -> Self {
        Self {
            id,
            username,
            password_hash,
        }
    }

    pub fn id(&self) -> UserID {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password_hash(&self) -> &PasswordHash {
        &self.password_hash
    }
}

/// A user that has not been inserted into the database yet.
#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub password_hash: PasswordHash,
}

/// Whether a transaction records money earned or money spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl FromStr for TransactionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            other => Err(ValidationError::InvalidType(other.to_owned())),
        }
    }
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An income or expense event owned by a user.
///
/// New instances should be created through `NewTransaction::insert(...)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    id: DatabaseID,
    trans_type: TransactionType,
    amount: f64,
    date: NaiveDate,
    category: String,
    user_id: UserID,
}

impl Transaction {
    /// Create a new `Transaction`.
    ///
    /// Note that this does *not* add the transaction to the application database.
    pub fn new(
        id: DatabaseID,
        trans_type: TransactionType,
        amount: f64,
        date: NaiveDate,
        category: String,
        user_id: UserID,
    ) -> Self {
        Self {
            id,
            trans_type,
            amount,
            date,
            category,
            user_id,
        }
    }

    pub fn id(&self) -> DatabaseID {
        self.id
    }

    pub fn trans_type(&self) -> TransactionType {
        self.trans_type
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn date(&self) -> &NaiveDate {
        &self.date
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn user_id(&self) -> UserID {
        self.user_id
    }
}

/// An amount as sent by the client, either a JSON number or a numeric string.
///
/// The browser client sends amounts as strings taken straight from a form
/// input, so both shapes must be accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Number(f64),
    Text(String),
}

impl RawAmount {
    fn into_f64(self) -> Result<f64, ValidationError> {
        match self {
            Self::Number(amount) => Ok(amount),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| ValidationError::InvalidAmount(text)),
        }
    }
}

/// A transaction that has been validated but not yet inserted into the
/// database.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    trans_type: TransactionType,
    amount: f64,
    date: NaiveDate,
    category: String,
    user_id: UserID,
}

impl NewTransaction {
    /// Validate raw client input and create a `NewTransaction`.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - `trans_type` is not "income" or "expense",
    /// - `amount` cannot be parsed as a number, is not finite, or is
    ///   negative,
    /// - or `date` is not a valid calendar date in YYYY-MM-DD form.
    pub fn new(
        trans_type: &str,
        amount: RawAmount,
        date: &str,
        category: String,
        user_id: UserID,
    ) -> Result<Self, ValidationError> {
        let trans_type = trans_type.parse()?;

        // f64 parsing accepts "inf", "infinity", and "nan", so finiteness
        // has to be checked explicitly.
        let amount = amount.into_f64()?;
        if !amount.is_finite() {
            return Err(ValidationError::NonFiniteAmount(amount));
        }
        if amount < 0.0 {
            return Err(ValidationError::NegativeAmount(amount));
        }

        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| ValidationError::InvalidDate(date.to_owned()))?;

        Ok(Self {
            trans_type,
            amount,
            date,
            category,
            user_id,
        })
    }

    pub fn trans_type(&self) -> TransactionType {
        self.trans_type
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn date(&self) -> &NaiveDate {
        &self.date
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn user_id(&self) -> UserID {
        self.user_id
    }
}
