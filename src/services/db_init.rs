use mongodb::{
    Database, IndexModel,
    bson::doc,
    options::IndexOptions,
};

pub async fn ensure_indexes(db: &Database) -> Result<(), String> {
    // alerts: unique per (user_id, symbol, asset_type) while active
    {
        let col = db.collection::<mongodb::bson::Document>("alerts");
        let model = IndexModel::builder()
            .keys(doc! { "user_id": 1, "symbol": 1, "asset_type": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .partial_filter_expression(doc! { "active": true })
                    .build(),
            )
            .build();

        col.create_index(model, None)
            .await
            .map_err(|e| e.to_string())?;
    }

    // alerts: helpful for the evaluator scan and poller symbol listing
    {
        let col = db.collection::<mongodb::bson::Document>("alerts");
        let model = IndexModel::builder()
            .keys(doc! { "active": 1, "asset_type": 1, "symbol": 1 })
            .build();

        let _ = col.create_index(model, None).await;
    }

    // alert_history: per-alert and per-user timelines, newest first
    {
        let col = db.collection::<mongodb::bson::Document>("alert_history");
        let model = IndexModel::builder()
            .keys(doc! { "alert_id": 1, "fired_at": -1 })
            .build();

        col.create_index(model, None)
            .await
            .map_err(|e| e.to_string())?;

        let model = IndexModel::builder()
            .keys(doc! { "user_id": 1, "fired_at": -1 })
            .build();

        col.create_index(model, None)
            .await
            .map_err(|e| e.to_string())?;
    }

    Ok(())
}
