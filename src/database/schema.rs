//! SQL for table `dispatch`

pub const DROP_DISPATCH: &str = "DROP TABLE IF EXISTS dispatch";

pub const CREATE_DISPATCH: &str = "CREATE TABLE dispatch (
    id BIGINT,
    event_number VARCHAR(20) NOT NULL PRIMARY KEY,
    street_num INT,
    street_name VARCHAR(40),
    full_address VARCHAR(60),
    city VARCHAR(10),
    reporting_district VARCHAR(6),
    dispatch_date_time TIMESTAMP,
    dispatch_date DATE,
    dispatch_time TIME,
    incident_type VARCHAR(100),
    lat DOUBLE PRECISION,
    lon DOUBLE PRECISION
)";

pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_dispatch_date_time ON dispatch(dispatch_date_time)",
    "CREATE INDEX IF NOT EXISTS idx_dispatch_incident_type ON dispatch(incident_type)",
];

pub const ENABLE_EXTENSIONS: &[&str] = &["CREATE EXTENSION IF NOT EXISTS postgis"];

pub const DISABLE_EXTENSIONS: &[&str] = &["DROP EXTENSION IF EXISTS postgis"];

/// Insert prefix; values and the conflict clause are appended per batch
pub const INSERT_DISPATCH: &str = "INSERT INTO dispatch (
    id, event_number, street_num, street_name, full_address, city,
    reporting_district, dispatch_date_time, dispatch_date, dispatch_time,
    incident_type, lat, lon
) ";

pub const ON_CONFLICT_IGNORE: &str = " ON CONFLICT (event_number) DO NOTHING";

pub const SELECT_DISPATCH: &str = "SELECT id, event_number, street_num, street_name,
    full_address, city, reporting_district, dispatch_date_time, dispatch_date,
    dispatch_time, incident_type, lat, lon
FROM dispatch";
