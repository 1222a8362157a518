use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        trip::{NewTrip, Trip, TripDetail, TripScope, TripStatus},
        user::UserProfile,
    },
};

const DETAIL_SELECT: &str = r#"
SELECT t.id, t.pick_up_address, t.drop_off_address, t.status, t.rider_id, t.driver_id,
       t.created, t.updated,
       r.username AS rider_username, r.first_name AS rider_first_name,
       r.last_name AS rider_last_name, r.group_name AS rider_group_name,
       r.photo AS rider_photo,
       d.username AS driver_username, d.first_name AS driver_first_name,
       d.last_name AS driver_last_name, d.group_name AS driver_group_name,
       d.photo AS driver_photo
FROM trips t
LEFT JOIN users r ON r.id = t.rider_id
LEFT JOIN users d ON d.id = t.driver_id"#;

#[derive(Debug, Clone)]
pub struct TripStore {
    db: DbPool,
}

impl TripStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn create(&self, new_trip: NewTrip) -> Result<Trip, AppError> {
        let now = Utc::now();
        let trip = Trip {
            id: Uuid::new_v4().to_string(),
            pick_up_address: new_trip.pick_up_address,
            drop_off_address: new_trip.drop_off_address,
            status: TripStatus::Requested,
            rider_id: new_trip.rider_id,
            driver_id: None,
            created: now,
            updated: now,
        };
        sqlx::query(
            r#"INSERT INTO trips (id, pick_up_address, drop_off_address, status, rider_id, driver_id, created, updated)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        )
        .bind(&trip.id)
        .bind(&trip.pick_up_address)
        .bind(&trip.drop_off_address)
        .bind(trip.status)
        .bind(trip.rider_id)
        .bind(trip.driver_id)
        .bind(trip.created)
        .bind(trip.updated)
        .execute(&self.db)
        .await?;
        Ok(trip)
    }

    /// Sets the status and, when given, the driver. There are no transition rules.
    pub async fn update(
        &self,
        trip_id: &str,
        status: TripStatus,
        driver_id: Option<i64>,
    ) -> Result<Trip, AppError> {
        let result = sqlx::query(
            r#"UPDATE trips SET status = ?1, driver_id = COALESCE(?2, driver_id), updated = ?3
               WHERE id = ?4"#,
        )
        .bind(status)
        .bind(driver_id)
        .bind(Utc::now())
        .bind(trip_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        self.get(trip_id).await?.ok_or(AppError::NotFound)
    }

    /// Like [`TripStore::update`], but only touches a trip the scope can see.
    /// Anything else is `NotFound`.
    pub async fn update_visible(
        &self,
        scope: TripScope,
        trip_id: &str,
        status: TripStatus,
        driver_id: Option<i64>,
    ) -> Result<Trip, AppError> {
        let sql = format!(
            "UPDATE trips AS t SET status = ?2, driver_id = COALESCE(?3, driver_id), updated = ?4 \
             WHERE t.id = ?5 AND {}",
            scope.sql_filter()
        );
        let result = sqlx::query(&sql)
            .bind(scope.user_id())
            .bind(status)
            .bind(driver_id)
            .bind(Utc::now())
            .bind(trip_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        self.get(trip_id).await?.ok_or(AppError::NotFound)
    }

    pub async fn get(&self, trip_id: &str) -> Result<Option<Trip>, AppError> {
        let trip = sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = ?1")
            .bind(trip_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(trip)
    }

    pub async fn find_detail(&self, trip_id: &str) -> Result<Option<TripDetail>, AppError> {
        let row = sqlx::query(&format!("{DETAIL_SELECT} WHERE t.id = ?1"))
            .bind(trip_id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(detail_from_row).transpose()
    }

    pub async fn list_visible(&self, scope: TripScope) -> Result<Vec<TripDetail>, AppError> {
        let sql = format!(
            "{DETAIL_SELECT} WHERE {} ORDER BY t.created, t.id",
            scope.sql_filter()
        );
        let rows = sqlx::query(&sql)
            .bind(scope.user_id())
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(detail_from_row).collect()
    }

    pub async fn find_visible(
        &self,
        scope: TripScope,
        trip_id: &str,
    ) -> Result<Option<TripDetail>, AppError> {
        let sql = format!("{DETAIL_SELECT} WHERE {} AND t.id = ?2", scope.sql_filter());
        let row = sqlx::query(&sql)
            .bind(scope.user_id())
            .bind(trip_id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(detail_from_row).transpose()
    }
}

fn detail_from_row(row: &SqliteRow) -> Result<TripDetail, AppError> {
    let trip = Trip {
        id: row.try_get("id")?,
        pick_up_address: row.try_get("pick_up_address")?,
        drop_off_address: row.try_get("drop_off_address")?,
        status: row.try_get("status")?,
        rider_id: row.try_get("rider_id")?,
        driver_id: row.try_get("driver_id")?,
        created: row.try_get("created")?,
        updated: row.try_get("updated")?,
    };
    let rider = profile_from_row(row, "rider", trip.rider_id)?;
    let driver = profile_from_row(row, "driver", trip.driver_id)?;
    Ok(TripDetail {
        trip,
        rider,
        driver,
    })
}

fn profile_from_row(
    row: &SqliteRow,
    prefix: &str,
    user_id: Option<i64>,
) -> Result<Option<UserProfile>, AppError> {
    let Some(id) = user_id else {
        return Ok(None);
    };
    let username: Option<String> = row.try_get(format!("{prefix}_username").as_str())?;
    // dangling reference
    let Some(username) = username else {
        return Ok(None);
    };
    Ok(Some(UserProfile {
        id,
        username,
        first_name: row.try_get(format!("{prefix}_first_name").as_str())?,
        last_name: row.try_get(format!("{prefix}_last_name").as_str())?,
        group: row.try_get(format!("{prefix}_group_name").as_str())?,
        photo: row.try_get(format!("{prefix}_photo").as_str())?,
    }))
}
