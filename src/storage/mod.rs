//! Capture persistence against the MongoDB document store
//!
//! The interception engine only depends on the [`TransactionStore`]
//! contract; [`MongoRepository`] is the production implementation.

use async_trait::async_trait;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::{Client, Collection, IndexModel};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::models::{RequestRecord, ResponseRecord, Transaction};

/// Persistence contract for captured transactions
///
/// Implementations assign identities and capture timestamps on save and
/// link responses back to their requests.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Assign identity and timestamp, persist, and leave the identity on
    /// the caller's record for linking
    async fn save_request(&self, record: &mut RequestRecord) -> Result<()>;

    /// Assign identity and timestamp, persist, then write the response
    /// identity into the referenced request's back-reference slot
    async fn save_response(&self, record: &mut ResponseRecord) -> Result<()>;

    /// Return the joined request/response pair
    async fn get_transaction(&self, request_id: ObjectId) -> Result<Transaction>;

    /// Release the store handle
    async fn close(&self) -> Result<()>;
}

/// MongoDB-backed transaction store
pub struct MongoRepository {
    client: Client,
    requests: Collection<RequestRecord>,
    responses: Collection<ResponseRecord>,
}

impl MongoRepository {
    /// Connect to the store and prepare the capture collections
    ///
    /// Fails when the server is unreachable; index creation failures are
    /// logged but do not prevent startup.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(database);

        db.run_command(doc! { "ping": 1 }, None).await?;

        let repo = Self {
            requests: db.collection::<RequestRecord>("requests"),
            responses: db.collection::<ResponseRecord>("responses"),
            client,
        };

        repo.create_indexes().await;
        info!("connected to capture store at {} (database: {})", uri, database);

        Ok(repo)
    }

    async fn create_indexes(&self) {
        let request_index = IndexModel::builder()
            .keys(doc! { "timestamp": -1 })
            .build();
        if let Err(e) = self.requests.create_index(request_index, None).await {
            error!("error creating timestamp index on requests: {}", e);
        }

        let response_index = IndexModel::builder()
            .keys(doc! { "request_id": 1 })
            .build();
        if let Err(e) = self.responses.create_index(response_index, None).await {
            error!("error creating request_id index on responses: {}", e);
        }
    }
}

#[async_trait]
impl TransactionStore for MongoRepository {
    async fn save_request(&self, record: &mut RequestRecord) -> Result<()> {
        record.id = Some(ObjectId::new());
        record.timestamp = chrono::Utc::now();

        self.requests.insert_one(&*record, None).await?;
        Ok(())
    }

    async fn save_response(&self, record: &mut ResponseRecord) -> Result<()> {
        let response_id = ObjectId::new();
        record.id = Some(response_id);
        record.timestamp = chrono::Utc::now();

        self.responses.insert_one(&*record, None).await?;

        self.requests
            .update_one(
                doc! { "_id": record.request_id },
                doc! { "$set": { "response_id": response_id } },
                None,
            )
            .await?;

        Ok(())
    }

    async fn get_transaction(&self, request_id: ObjectId) -> Result<Transaction> {
        let request = self
            .requests
            .find_one(doc! { "_id": request_id }, None)
            .await?
            .ok_or_else(|| Error::NotFound(format!("request {}", request_id)))?;

        let response = self
            .responses
            .find_one(doc! { "request_id": request_id }, None)
            .await?
            .ok_or_else(|| Error::NotFound(format!("response for request {}", request_id)))?;

        Ok(Transaction { request, response })
    }

    async fn close(&self) -> Result<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}
