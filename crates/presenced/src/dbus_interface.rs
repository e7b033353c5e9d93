//! D-Bus surface of the attendance daemon.
//!
//! Bus name: org.presence.Attendance1
//! Object path: /org/presence/Attendance1
//!
//! Payloads cross the bus as JSON strings; clients poll `LatestResults`
//! and `EnrollmentProgress` for their overlays.

use std::sync::Arc;

use zbus::interface;

use crate::attendance::MarkOutcome;
use crate::dispatch::DispatchError;
use crate::engine::{EngineError, EngineHandle};
use crate::store::{NewEmployee, Store, StoreError};

pub struct AttendanceService {
    engine: EngineHandle,
    store: Arc<Store>,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, store: Arc<Store>) -> Self {
        Self { engine, store }
    }
}

#[interface(name = "org.presence.Attendance1")]
impl AttendanceService {
    /// Start a live attendance scan session.
    async fn start_scan(&self) -> zbus::fdo::Result<()> {
        self.engine
            .start_scan()
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Stop the scan session.
    async fn stop_scan(&self) -> zbus::fdo::Result<()> {
        self.engine.stop_scan();
        Ok(())
    }

    /// Latest annotated recognition results as a JSON array.
    async fn latest_results(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.engine.latest_results())
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Start an enrollment capture session.
    async fn begin_enrollment(&self) -> zbus::fdo::Result<()> {
        self.engine
            .begin_enrollment()
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Cancel the enrollment capture session, discarding progress.
    async fn cancel_enrollment(&self) -> zbus::fdo::Result<()> {
        self.engine.cancel_enrollment();
        Ok(())
    }

    /// Capture progress as JSON: {state, samples, required}.
    async fn enrollment_progress(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.engine.enrollment_progress())
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Persist a new employee using the samples from the completed
    /// enrollment capture. `payload` is a JSON [`NewEmployee`].
    async fn save_employee(&self, payload: &str) -> zbus::fdo::Result<String> {
        let employee: NewEmployee = serde_json::from_str(payload)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad employee payload: {e}")))?;

        let samples = self.engine.take_pending_samples().ok_or_else(|| {
            zbus::fdo::Error::Failed("no completed enrollment capture to save".into())
        })?;

        let store = Arc::clone(&self.store);
        let engine = self.engine.clone();
        let code = employee.code.clone();
        tokio::task::spawn_blocking(move || -> Result<(), EngineError> {
            store.add_employee(&employee, &samples)?;
            engine.reload_gallery()?;
            Ok(())
        })
        .await
        .map_err(|e| zbus::fdo::Error::Failed(format!("save task failed: {e}")))?
        .map_err(|e| match e {
            EngineError::Store(StoreError::DuplicateEmployee(code)) => {
                zbus::fdo::Error::Failed(format!("employee code already exists: {code}"))
            }
            other => zbus::fdo::Error::Failed(other.to_string()),
        })?;

        tracing::info!(emp_code = %code, "employee saved via D-Bus");
        Ok(format!("Employee {code} registered"))
    }

    /// Manual check-in for an employee code.
    async fn manual_mark(&self, emp_code: &str) -> zbus::fdo::Result<String> {
        match self.engine.manual_mark(emp_code).await {
            Ok(MarkOutcome::Marked { full_name }) => Ok(format!("Welcome, {full_name}")),
            Ok(MarkOutcome::AlreadyMarked) => Ok("Already Marked Today".to_string()),
            Ok(MarkOutcome::NotFound) => {
                Err(zbus::fdo::Error::Failed("Employee Not Found".into()))
            }
            Err(DispatchError::OffNetwork) => Err(zbus::fdo::Error::AccessDenied(
                "not connected to the office network".into(),
            )),
            Err(e) => Err(zbus::fdo::Error::Failed(e.to_string())),
        }
    }

    /// Reload the gallery from the store. Returns the template count.
    async fn reload_gallery(&self) -> zbus::fdo::Result<u64> {
        let engine = self.engine.clone();
        let count = tokio::task::spawn_blocking(move || engine.reload_gallery())
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("reload task failed: {e}")))?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(count as u64)
    }

    /// Whether the manual-entry fallback is currently surfaced.
    async fn pending_fallback(&self) -> zbus::fdo::Result<bool> {
        Ok(self.engine.pending_fallback())
    }

    /// Daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let employees = self.store.employee_count().unwrap_or(0);
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "mode": self.engine.mode().as_str(),
            "gallery_templates": self.engine.gallery_len(),
            "employees": employees,
            "pending_fallback": self.engine.pending_fallback(),
        })
        .to_string())
    }
}
