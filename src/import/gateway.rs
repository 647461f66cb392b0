use crate::db;
use crate::model::{Course, GradeEntry, GradePolicy, StudentProfile};
use rusqlite::{Connection, ErrorCode, Transaction};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// This record cannot be stored; the batch can go on.
    #[error("{0}")]
    Rejected(String),
    /// The store itself is unusable; the batch must stop.
    #[error("database unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for GatewayError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(f, _) => match f.code {
                ErrorCode::ConstraintViolation | ErrorCode::TypeMismatch | ErrorCode::TooBig => {
                    GatewayError::Rejected(e.to_string())
                }
                _ => GatewayError::Unavailable(e.to_string()),
            },
            _ => GatewayError::Rejected(e.to_string()),
        }
    }
}

/// Insert-or-update access to profile and grade storage for one batch.
///
/// A gateway spans one unit of work: nothing is durable until `commit`,
/// and dropping an uncommitted gateway discards its writes. The record
/// hooks bracket each record so a rejected record leaves no partial state.
pub trait ImportGateway {
    fn begin_record(&mut self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn finish_record(&mut self, _keep: bool) -> Result<(), GatewayError> {
        Ok(())
    }

    fn upsert_profile(&mut self, profile: &StudentProfile) -> Result<(), GatewayError>;

    fn insert_grade(&mut self, grade: &GradeEntry) -> Result<(), GatewayError>;

    fn commit(&mut self) -> Result<(), GatewayError>;

    fn rollback(&mut self) -> Result<(), GatewayError>;
}

const RECORD_SAVEPOINT: &str = "import_record";

/// One SQLite transaction for the batch, one savepoint per record.
pub struct SqliteGateway<'c> {
    tx: Option<Transaction<'c>>,
    policy: GradePolicy,
}

impl<'c> SqliteGateway<'c> {
    pub fn begin(conn: &'c Connection, policy: GradePolicy) -> Result<Self, GatewayError> {
        let tx = conn.unchecked_transaction()?;
        Ok(Self {
            tx: Some(tx),
            policy,
        })
    }

    fn tx(&self) -> Result<&Transaction<'c>, GatewayError> {
        self.tx
            .as_ref()
            .ok_or_else(|| GatewayError::Unavailable("batch already finished".into()))
    }
}

impl ImportGateway for SqliteGateway<'_> {
    fn begin_record(&mut self) -> Result<(), GatewayError> {
        self.tx()?
            .execute_batch(&format!("SAVEPOINT {}", RECORD_SAVEPOINT))
            .map_err(|e| GatewayError::Unavailable(e.to_string()))
    }

    fn finish_record(&mut self, keep: bool) -> Result<(), GatewayError> {
        let sql = if keep {
            format!("RELEASE {}", RECORD_SAVEPOINT)
        } else {
            format!(
                "ROLLBACK TO {sp}; RELEASE {sp}",
                sp = RECORD_SAVEPOINT
            )
        };
        self.tx()?
            .execute_batch(&sql)
            .map_err(|e| GatewayError::Unavailable(e.to_string()))
    }

    fn upsert_profile(&mut self, profile: &StudentProfile) -> Result<(), GatewayError> {
        db::upsert_student(self.tx()?, profile)?;
        Ok(())
    }

    fn insert_grade(&mut self, grade: &GradeEntry) -> Result<(), GatewayError> {
        let policy = self.policy;
        let tx = self.tx()?;
        db::upsert_course(
            tx,
            &Course {
                course_code: grade.course_code.clone(),
                course_title: grade.course_title.clone(),
                credit_hours: grade.credit_hours,
                department: None,
                instructor: None,
            },
        )?;
        db::ensure_semester(tx, &grade.semester, &grade.academic_year)?;
        db::write_grade(tx, grade, policy).map_err(|e| match GatewayError::from(e) {
            GatewayError::Rejected(msg) if policy == GradePolicy::InsertOnly => {
                GatewayError::Rejected(format!(
                    "grade already recorded for {} in {} {} {} ({})",
                    grade.index_number, grade.course_code, grade.semester, grade.academic_year, msg
                ))
            }
            other => other,
        })
    }

    fn commit(&mut self) -> Result<(), GatewayError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| GatewayError::Unavailable("batch already finished".into()))?;
        tx.commit()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))
    }

    fn rollback(&mut self) -> Result<(), GatewayError> {
        match self.tx.take() {
            Some(tx) => tx
                .rollback()
                .map_err(|e| GatewayError::Unavailable(e.to_string())),
            None => Ok(()),
        }
    }
}
