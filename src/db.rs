//! The database layer: schema creation and the traits that map domain types
//! to and from SQLite rows.

use std::fmt::Display;

use rusqlite::{named_params, Connection, Error, Row};

use crate::models::{
    NewTransaction, NewUser, PasswordHash, Transaction, TransactionType, User, UserID,
};
use crate::report::MonthlySummary;

/// Errors originating from operations on the app's database.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DbError {
    /// The username already exists in the database. The client should try
    /// again with a different username.
    DuplicateUsername,
    /// A query was given an invalid foreign key. The client should check that
    /// the ids are valid.
    InvalidForeignKey,
    /// The row could not be found with the provided info (e.g., id). The
    /// client should try again with different parameters.
    NotFound,
    /// Wrapper for SQLite errors not handled by the other enum entries.
    SqlError(Error),
}

impl Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqlError(inner_error) => write!(f, "{:?}: {}", self, inner_error),
            other => write!(f, "{:?}", other),
        }
    }
}

impl From<Error> for DbError {
    fn from(error: Error) -> Self {
        match error {
            // Code 787 occurs when a FOREIGN KEY constraint failed.
            Error::SqliteFailure(sql_error, Some(_)) if sql_error.extended_code == 787 => {
                DbError::InvalidForeignKey
            }
            // Code 2067 occurs when a UNIQUE constraint failed.
            Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.contains("username") =>
            {
                DbError::DuplicateUsername
            }
            Error::QueryReturnedNoRows => DbError::NotFound,
            e => DbError::SqlError(e),
        }
    }
}

/// A trait for adding an object schema to a database.
pub trait CreateTable {
    /// Create a table for the model if it does not already exist.
    ///
    /// # Errors
    /// Returns an error if there is an SQL error.
    fn create_table(connection: &Connection) -> Result<(), DbError>;
}

/// A trait for mapping from a `rusqlite::Row` from a SQLite database to a
/// concrete rust type.
pub trait MapRow {
    type ReturnType;

    /// Convert a row into a concrete type.
    ///
    /// **Note:** This function expects that the row object contains all the
    /// table columns in the order they were defined.
    ///
    /// # Errors
    /// Returns an error if a row item cannot be converted into the
    /// corresponding rust type, or if an invalid column index was used.
    fn map_row(row: &Row) -> Result<Self::ReturnType, Error>;
}

/// A trait for inserting a record into the application database.
pub trait Insert {
    type ResultType;

    /// Insert the object into the application database.
    ///
    /// # Errors
    ///
    /// This function will return an error if the insertion failed.
    fn insert(self, connection: &Connection) -> Result<Self::ResultType, DbError>;
}

/// A trait for retrieving records from the application database by a field of
/// type `T`.
pub trait SelectBy<T> {
    type ResultType;

    /// Select records from the application database that match `field`.
    fn select(field: T, connection: &Connection) -> Result<Self::ResultType, DbError>;
}

/// Create the application's tables and enable foreign key enforcement.
///
/// Safe to call on a database that already has the tables.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn initialize(connection: &Connection) -> Result<(), DbError> {
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .map_err(DbError::SqlError)?;

    User::create_table(connection)?;
    Transaction::create_table(connection)?;

    Ok(())
}

impl CreateTable for User {
    fn create_table(connection: &Connection) -> Result<(), DbError> {
        connection.execute(
            "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT UNIQUE NOT NULL,
                    password TEXT NOT NULL
                    )",
            (),
        )?;

        Ok(())
    }
}

impl MapRow for User {
    type ReturnType = Self;

    fn map_row(row: &Row) -> Result<Self, Error> {
        let raw_id = row.get(0)?;
        let username = row.get(1)?;
        let raw_password_hash = row.get(2)?;

        Ok(Self::new(
            UserID::new(raw_id),
            username,
            PasswordHash::new_unchecked(raw_password_hash),
        ))
    }
}

impl Insert for NewUser {
    type ResultType = User;

    /// Create a new user in the database.
    ///
    /// # Errors
    /// This function will return `DbError::DuplicateUsername` if the username
    /// is already taken, or another error if there was a problem executing
    /// the SQL query.
    fn insert(self, connection: &Connection) -> Result<Self::ResultType, DbError> {
        connection.execute(
            "INSERT INTO users (username, password) VALUES (?1, ?2)",
            (&self.username, self.password_hash.as_ref()),
        )?;

        let id = UserID::new(connection.last_insert_rowid());

        Ok(User::new(id, self.username, self.password_hash))
    }
}

impl SelectBy<&str> for User {
    type ResultType = User;

    /// Get the user from the database that has the specified `username`.
    ///
    /// # Errors
    /// This function will return `DbError::NotFound` if no such user exists,
    /// or another error if there are SQL related errors.
    fn select(username: &str, connection: &Connection) -> Result<Self::ResultType, DbError> {
        connection
            .prepare("SELECT id, username, password FROM users WHERE username = :username")?
            .query_row(&[(":username", username)], User::map_row)
            .map_err(|e| e.into())
    }
}

impl CreateTable for Transaction {
    fn create_table(connection: &Connection) -> Result<(), DbError> {
        connection.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    trans_type TEXT NOT NULL,
                    amount REAL NOT NULL,
                    date TEXT NOT NULL,
                    category TEXT NOT NULL,
                    FOREIGN KEY(user_id) REFERENCES users(id) ON UPDATE CASCADE ON DELETE CASCADE
                    )",
            (),
        )?;

        Ok(())
    }
}

impl MapRow for Transaction {
    type ReturnType = Self;

    fn map_row(row: &Row) -> Result<Self, Error> {
        let id = row.get(0)?;
        let user_id = UserID::new(row.get(1)?);

        let raw_type: String = row.get(2)?;
        let trans_type = raw_type.parse::<TransactionType>().map_err(|e| {
            Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let amount = row.get(3)?;
        let date = row.get(4)?;
        let category = row.get(5)?;

        Ok(Self::new(id, trans_type, amount, date, category, user_id))
    }
}

impl Insert for NewTransaction {
    type ResultType = Transaction;

    /// Create a new transaction in the database.
    ///
    /// # Errors
    /// This function will return an error if:
    /// - `user_id` does not refer to a valid user,
    /// - or there is some other SQL error.
    fn insert(self, connection: &Connection) -> Result<Self::ResultType, DbError> {
        connection.execute(
            "INSERT INTO transactions (user_id, trans_type, amount, date, category)
                VALUES (:user_id, :trans_type, :amount, :date, :category)",
            named_params! {
                ":user_id": self.user_id().as_i64(),
                ":trans_type": self.trans_type().as_str(),
                ":amount": self.amount(),
                ":date": self.date(),
                ":category": self.category(),
            },
        )?;

        let transaction_id = connection.last_insert_rowid();

        Ok(Transaction::new(
            transaction_id,
            self.trans_type(),
            self.amount(),
            *self.date(),
            self.category().to_owned(),
            self.user_id(),
        ))
    }
}

impl SelectBy<UserID> for Transaction {
    type ResultType = Vec<Self>;

    /// Retrieve the transactions in the database that belong to `user_id`,
    /// most recent date first. Transactions on the same date are returned
    /// newest insertion first so the ordering is deterministic.
    ///
    /// # Errors
    /// This function will return an error if there is an SQL error.
    fn select(user_id: UserID, connection: &Connection) -> Result<Self::ResultType, DbError> {
        connection
            .prepare(
                "SELECT id, user_id, trans_type, amount, date, category
                    FROM transactions
                    WHERE user_id = :user_id
                    ORDER BY date DESC, id DESC",
            )?
            .query_map(
                &[(":user_id", &user_id.as_i64())],
                Transaction::map_row,
            )?
            .map(|maybe_transaction| maybe_transaction.map_err(DbError::SqlError))
            .collect()
    }
}

/// Sum the amounts of a user's transactions of one type into per-month
/// buckets.
///
/// The SQL groups by year and month, but the output array is indexed by
/// month-of-year only: when a user has transactions in the same calendar
/// month of two different years, the later year's total overwrites the
/// earlier one instead of adding to it. Months with no transactions are 0.0.
fn monthly_totals(
    user_id: UserID,
    trans_type: TransactionType,
    connection: &Connection,
) -> Result<[f64; 12], DbError> {
    let mut totals = [0.0; 12];

    let mut statement = connection.prepare(
        "SELECT strftime('%Y-%m', date) AS month, SUM(amount)
            FROM transactions
            WHERE user_id = :user_id AND trans_type = :trans_type
            GROUP BY month
            ORDER BY month",
    )?;

    let rows = statement.query_map(
        named_params! {
            ":user_id": user_id.as_i64(),
            ":trans_type": trans_type.as_str(),
        },
        |row| {
            let month: String = row.get(0)?;
            let total: f64 = row.get(1)?;
            Ok((month, total))
        },
    )?;

    for row in rows {
        let (month, total) = row.map_err(DbError::SqlError)?;

        // `month` is "YYYY-MM"; dates are validated on insert so the group
        // key always has this shape.
        if let Some(index) = month
            .get(5..7)
            .and_then(|month_number| month_number.parse::<usize>().ok())
            .and_then(|month_number| month_number.checked_sub(1))
            .filter(|index| *index < 12)
        {
            totals[index] = total;
        }
    }

    Ok(totals)
}

impl SelectBy<UserID> for MonthlySummary {
    type ResultType = Self;

    /// Compute the monthly income and expense totals for `user_id`.
    ///
    /// # Errors
    /// This function will return an error if there is an SQL error.
    fn select(user_id: UserID, connection: &Connection) -> Result<Self::ResultType, DbError> {
        let expenses_by_month = monthly_totals(user_id, TransactionType::Expense, connection)?;
        let income_by_month = monthly_totals(user_id, TransactionType::Income, connection)?;

        Ok(MonthlySummary {
            expenses_by_month,
            income_by_month,
        })
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use crate::models::{
        NewTransaction, NewUser, PasswordHash, RawAmount, Transaction, User, UserID,
    };
    use crate::report::MonthlySummary;

    use super::{initialize, DbError, Insert, SelectBy};

    fn get_test_connection() -> Connection {
        let connection = Connection::open_in_memory().expect("Could not open database in memory.");
        initialize(&connection).expect("Could not initialize database.");

        connection
    }

    fn insert_test_user(username: &str, connection: &Connection) -> User {
        NewUser {
            username: username.to_owned(),
            password_hash: PasswordHash::new_unchecked("notarealhash".to_owned()),
        }
        .insert(connection)
        .unwrap()
    }

    fn insert_test_transaction(
        trans_type: &str,
        amount: f64,
        date: &str,
        user_id: UserID,
        connection: &Connection,
    ) -> Transaction {
        NewTransaction::new(
            trans_type,
            RawAmount::Number(amount),
            date,
            "Misc".to_owned(),
            user_id,
        )
        .unwrap()
        .insert(connection)
        .unwrap()
    }

    #[test]
    fn initialize_is_idempotent() {
        let connection = get_test_connection();

        assert_eq!(initialize(&connection), Ok(()));
    }

    #[test]
    fn insert_duplicate_username_fails_and_keeps_one_row() {
        let connection = get_test_connection();
        insert_test_user("alice", &connection);

        let result = NewUser {
            username: "alice".to_owned(),
            password_hash: PasswordHash::new_unchecked("anotherhash".to_owned()),
        }
        .insert(&connection);

        assert_eq!(result, Err(DbError::DuplicateUsername));

        let count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM users WHERE username = 'alice'",
                (),
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn select_user_by_username() {
        let connection = get_test_connection();
        let inserted_user = insert_test_user("alice", &connection);

        let selected_user = User::select("alice", &connection).unwrap();

        assert_eq!(selected_user, inserted_user);
    }

    #[test]
    fn select_missing_user_returns_not_found() {
        let connection = get_test_connection();

        assert_eq!(User::select("nobody", &connection), Err(DbError::NotFound));
    }

    #[test]
    fn insert_transaction_with_invalid_user_fails() {
        let connection = get_test_connection();

        let result = NewTransaction::new(
            "expense",
            RawAmount::Number(1.0),
            "2024-01-01",
            "Misc".to_owned(),
            UserID::new(999),
        )
        .unwrap()
        .insert(&connection);

        assert_eq!(result, Err(DbError::InvalidForeignKey));
    }

    #[test]
    fn select_transactions_orders_by_date_descending() {
        let connection = get_test_connection();
        let user = insert_test_user("alice", &connection);

        let oldest = insert_test_transaction("expense", 1.0, "2024-01-01", user.id(), &connection);
        let newest = insert_test_transaction("expense", 2.0, "2024-03-01", user.id(), &connection);
        let middle = insert_test_transaction("expense", 3.0, "2024-02-01", user.id(), &connection);

        let transactions = Transaction::select(user.id(), &connection).unwrap();

        assert_eq!(transactions, vec![newest, middle, oldest]);
    }

    #[test]
    fn select_transactions_breaks_date_ties_by_newest_id() {
        let connection = get_test_connection();
        let user = insert_test_user("alice", &connection);

        let first = insert_test_transaction("expense", 1.0, "2024-01-01", user.id(), &connection);
        let second = insert_test_transaction("expense", 2.0, "2024-01-01", user.id(), &connection);

        let transactions = Transaction::select(user.id(), &connection).unwrap();

        assert_eq!(transactions, vec![second, first]);
    }

    #[test]
    fn select_transactions_never_returns_other_users_rows() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", &connection);
        let bob = insert_test_user("bob", &connection);

        insert_test_transaction("expense", 1.0, "2024-01-01", alice.id(), &connection);
        let bobs = insert_test_transaction("income", 2.0, "2024-01-02", bob.id(), &connection);

        let transactions = Transaction::select(bob.id(), &connection).unwrap();

        assert_eq!(transactions, vec![bobs]);
    }

    #[test]
    fn select_transactions_returns_empty_vec_for_user_with_none() {
        let connection = get_test_connection();
        let user = insert_test_user("alice", &connection);

        let transactions = Transaction::select(user.id(), &connection).unwrap();

        assert!(transactions.is_empty());
    }

    #[test]
    fn monthly_summary_buckets_by_month() {
        let connection = get_test_connection();
        let user = insert_test_user("alice", &connection);

        insert_test_transaction("expense", 100.0, "2024-03-15", user.id(), &connection);
        insert_test_transaction("income", 500.0, "2024-02-01", user.id(), &connection);

        let summary = MonthlySummary::select(user.id(), &connection).unwrap();

        assert_eq!(summary.expenses_by_month[2], 100.0);
        assert_eq!(summary.income_by_month[1], 500.0);

        let other_expenses: f64 = summary
            .expenses_by_month
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != 2)
            .map(|(_, total)| total)
            .sum();
        assert_eq!(other_expenses, 0.0);
    }

    #[test]
    fn monthly_summary_sums_within_one_month() {
        let connection = get_test_connection();
        let user = insert_test_user("alice", &connection);

        insert_test_transaction("expense", 100.0, "2024-03-15", user.id(), &connection);
        insert_test_transaction("expense", 50.0, "2024-03-20", user.id(), &connection);

        let summary = MonthlySummary::select(user.id(), &connection).unwrap();

        assert_eq!(summary.expenses_by_month[2], 150.0);
    }

    #[test]
    fn monthly_summary_same_month_in_later_year_overwrites_earlier_year() {
        let connection = get_test_connection();
        let user = insert_test_user("alice", &connection);

        insert_test_transaction("expense", 40.0, "2023-03-10", user.id(), &connection);
        insert_test_transaction("expense", 100.0, "2024-03-15", user.id(), &connection);

        let summary = MonthlySummary::select(user.id(), &connection).unwrap();

        // Buckets are keyed by month-of-year only, so March 2024 replaces
        // March 2023 rather than accumulating.
        assert_eq!(summary.expenses_by_month[2], 100.0);
    }

    #[test]
    fn monthly_summary_is_scoped_to_the_user() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", &connection);
        let bob = insert_test_user("bob", &connection);

        insert_test_transaction("expense", 100.0, "2024-03-15", alice.id(), &connection);

        let summary = MonthlySummary::select(bob.id(), &connection).unwrap();

        assert_eq!(summary.expenses_by_month, [0.0; 12]);
        assert_eq!(summary.income_by_month, [0.0; 12]);
    }
}
