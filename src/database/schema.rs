table! {
    cluster (cluster_id) {
        cluster_id -> Int4,
        parent_cluster_id -> Nullable<Int4>,
        centroid_lat -> Float8,
        centroid_lon -> Float8,
        centroid_time_days -> Nullable<Float8>,
        level -> Int4,
        min_lat -> Nullable<Float8>,
        max_lat -> Nullable<Float8>,
        min_lon -> Nullable<Float8>,
        max_lon -> Nullable<Float8>,
        min_date -> Nullable<Timestamptz>,
        max_date -> Nullable<Timestamptz>,
    }
}

table! {
    event (event_id) {
        event_id -> Int4,
        event_name -> Text,
        date -> Timestamptz,
        lat -> Float8,
        lon -> Float8,
        description -> Nullable<Text>,
        image -> Nullable<Text>,
        video -> Nullable<Text>,
    }
}

table! {
    eventclustermap (event_id, cluster_id) {
        event_id -> Int4,
        cluster_id -> Int4,
    }
}

table! {
    eventtag (event_id, tag_id) {
        event_id -> Int4,
        tag_id -> Int4,
    }
}

table! {
    tag (tag_id) {
        tag_id -> Int4,
        tag_name -> Text,
    }
}

joinable!(eventclustermap -> cluster (cluster_id));
joinable!(eventclustermap -> event (event_id));
joinable!(eventtag -> event (event_id));
joinable!(eventtag -> tag (tag_id));

allow_tables_to_appear_in_same_query!(cluster, event, eventclustermap, eventtag, tag,);
