diesel::table! {
    feature_entities (name) {
        name -> Text,
        join_keys -> Array<Text>,
        description -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    feature_views (name, version) {
        name -> Text,
        version -> Text,
        entity -> Text,
        timestamp_column -> Text,
        description -> Text,
        feature_descriptions -> Jsonb,
        #[sql_name = "columns"]
        column_list -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    feature_rows (view_name, view_version, customer_id) {
        view_name -> Text,
        view_version -> Text,
        customer_id -> Int8,
        return_ratio -> Nullable<Float8>,
        frequency -> Float8,
        latest_order_date -> Date,
    }
}

diesel::table! {
    registered_models (name) {
        name -> Text,
        default_version -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    model_versions (model_name, version) {
        model_name -> Text,
        version -> Text,
        version_number -> Int4,
        comment -> Text,
        artifact -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(feature_views -> feature_entities (entity));
diesel::joinable!(model_versions -> registered_models (model_name));

diesel::allow_tables_to_appear_in_same_query!(
    feature_entities,
    feature_views,
    feature_rows,
    registered_models,
    model_versions,
);
