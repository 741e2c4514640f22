use diesel::{Connection, ConnectionError, PgConnection};
use mobc::{async_trait, Manager, Pool};

pub struct PgConnectionManager {
    database_url: String,
}

impl PgConnectionManager {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl Manager for PgConnectionManager {
    type Connection = PgConnection;
    type Error = ConnectionError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        PgConnection::establish(&self.database_url)
    }

    async fn check(&self, conn: Self::Connection) -> Result<Self::Connection, Self::Error> {
        conn.execute("SELECT 1")
            .map_err(|err| ConnectionError::BadConnection(err.to_string()))?;
        Ok(conn)
    }
}

pub type PgPool = Pool<PgConnectionManager>;

pub fn establish_connection_pool(database_url: &str, max_open: u64) -> PgPool {
    Pool::builder()
        .max_open(max_open)
        .build(PgConnectionManager::new(database_url))
}
