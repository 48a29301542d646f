mod common;

use common::{
    assert_close, date, feature_records, init_test_logging, test_engine, two_customer_scenario,
    RawData,
};
use customer_segmentation_service::catalog::{Environment, LineItemRow, OrderReturnRow, OrderRow};
use customer_segmentation_service::features::ZeroValuePolicy;

#[tokio::test]
async fn test_fully_returned_single_order_has_ratio_one() {
    init_test_logging();

    // Given: one order whose every unit came back
    let engine = test_engine();
    RawData {
        orders: vec![OrderRow::new(1, 1, date(2022, 2, 2))],
        lineitems: vec![LineItemRow::new(1, 10, 3, 1_999), LineItemRow::new(1, 11, 1, 450)],
        returns: vec![OrderReturnRow::new(1, 10, 3), OrderReturnRow::new(1, 11, 1)],
    }
    .register(&engine, Environment::Training);

    // When
    let features = feature_records(&engine, Environment::Training, ZeroValuePolicy::AsZero).await;

    // Then
    assert_eq!(features.len(), 1);
    assert_close(features[0].return_ratio.unwrap(), 1.0);
    assert_close(features[0].frequency, 1.0);
    assert_eq!(features[0].latest_order_date, date(2022, 2, 2));
}

#[tokio::test]
async fn test_unreturned_single_order_has_ratio_zero() {
    init_test_logging();

    // Given
    let engine = test_engine();
    RawData {
        orders: vec![OrderRow::new(1, 1, date(2022, 2, 2))],
        lineitems: vec![LineItemRow::new(1, 10, 3, 1_999)],
        returns: vec![],
    }
    .register(&engine, Environment::Training);

    // When
    let features = feature_records(&engine, Environment::Training, ZeroValuePolicy::AsZero).await;

    // Then
    assert_eq!(features.len(), 1);
    assert_close(features[0].return_ratio.unwrap(), 0.0);
}

#[tokio::test]
async fn test_frequency_within_one_year_is_the_order_count() {
    init_test_logging();

    // Given: three orders in 2023
    let engine = test_engine();
    RawData {
        orders: vec![
            OrderRow::new(1, 1, date(2023, 1, 10)),
            OrderRow::new(2, 1, date(2023, 5, 10)),
            OrderRow::new(3, 1, date(2023, 12, 31)),
        ],
        lineitems: vec![
            LineItemRow::new(1, 10, 1, 100),
            LineItemRow::new(2, 10, 1, 100),
            LineItemRow::new(3, 10, 1, 100),
        ],
        returns: vec![],
    }
    .register(&engine, Environment::Training);

    // When
    let features = feature_records(&engine, Environment::Training, ZeroValuePolicy::AsZero).await;

    // Then
    assert_close(features[0].frequency, 3.0);
    assert_eq!(features[0].latest_order_date, date(2023, 12, 31));
}

#[tokio::test]
async fn test_frequency_averages_per_year_counts() {
    init_test_logging();

    // Given: customer 1 with 2 + 2 orders, customer 2 with 3 + 1 orders over two years
    let engine = test_engine();
    let orders = vec![
        OrderRow::new(1, 1, date(2021, 3, 1)),
        OrderRow::new(2, 1, date(2021, 4, 1)),
        OrderRow::new(3, 1, date(2022, 3, 1)),
        OrderRow::new(4, 1, date(2022, 4, 1)),
        OrderRow::new(5, 2, date(2021, 3, 1)),
        OrderRow::new(6, 2, date(2021, 4, 1)),
        OrderRow::new(7, 2, date(2021, 5, 1)),
        OrderRow::new(8, 2, date(2023, 3, 1)),
    ];
    let lineitems = (1..=8).map(|id| LineItemRow::new(id, 1, 1, 1_000)).collect();
    RawData {
        orders,
        lineitems,
        returns: vec![],
    }
    .register(&engine, Environment::Training);

    // When
    let features = feature_records(&engine, Environment::Training, ZeroValuePolicy::AsZero).await;

    // Then: evenly spread gives N/Y, uneven gives the mean of (3, 1)
    assert_eq!(features.len(), 2);
    assert_eq!(features[0].customer_id, 1);
    assert_close(features[0].frequency, 2.0);
    assert_eq!(features[1].customer_id, 2);
    assert_close(features[1].frequency, 2.0);
    assert_eq!(features[1].latest_order_date, date(2023, 3, 1));
}

#[tokio::test]
async fn test_frequency_only_counts_years_with_orders() {
    init_test_logging();

    // Given: 4 orders in 2021, none in 2022, 2 in 2023
    let engine = test_engine();
    let mut orders: Vec<OrderRow> = (1..=4)
        .map(|id| OrderRow::new(id, 1, date(2021, id as u32, 1)))
        .collect();
    orders.push(OrderRow::new(5, 1, date(2023, 1, 1)));
    orders.push(OrderRow::new(6, 1, date(2023, 6, 1)));
    let lineitems = (1..=6).map(|id| LineItemRow::new(id, 1, 1, 1_000)).collect();
    RawData {
        orders,
        lineitems,
        returns: vec![],
    }
    .register(&engine, Environment::Training);

    // When
    let features = feature_records(&engine, Environment::Training, ZeroValuePolicy::AsZero).await;

    // Then: mean of (4, 2), the empty year does not dilute it
    assert_close(features[0].frequency, 3.0);
}

#[tokio::test]
async fn test_ratio_is_averaged_per_order_not_over_totals() {
    init_test_logging();

    // Given: order 1 worth 10.00 fully returned, order 2 worth 90.00 not returned
    let engine = test_engine();
    RawData {
        orders: vec![
            OrderRow::new(1, 1, date(2023, 1, 1)),
            OrderRow::new(2, 1, date(2023, 2, 1)),
        ],
        lineitems: vec![LineItemRow::new(1, 1, 1, 1_000), LineItemRow::new(2, 1, 9, 1_000)],
        returns: vec![OrderReturnRow::new(1, 1, 1)],
    }
    .register(&engine, Environment::Training);

    // When
    let features = feature_records(&engine, Environment::Training, ZeroValuePolicy::AsZero).await;

    // Then: (1.0 + 0.0) / 2, not 10 / 100
    assert_close(features[0].return_ratio.unwrap(), 0.5);
}

#[tokio::test]
async fn test_two_customer_scenario_with_zero_value_orders_as_zero() {
    init_test_logging();

    // Given
    let engine = test_engine();
    two_customer_scenario().register(&engine, Environment::Training);

    // When
    let features = feature_records(&engine, Environment::Training, ZeroValuePolicy::AsZero).await;

    // Then: A averages 0.10 and 0.0, B's zero-value order counts as 0.0
    assert_eq!(features.len(), 2);
    assert_eq!(features[0].customer_id, 100);
    assert_close(features[0].return_ratio.unwrap(), 0.05);
    assert_close(features[0].frequency, 2.0);
    assert_eq!(features[1].customer_id, 200);
    assert_eq!(features[1].return_ratio, Some(0.0));
    assert_close(features[1].frequency, 1.0);
}

#[tokio::test]
async fn test_two_customer_scenario_with_zero_value_orders_excluded() {
    init_test_logging();

    // Given
    let engine = test_engine();
    two_customer_scenario().register(&engine, Environment::Training);

    // When
    let features = feature_records(&engine, Environment::Training, ZeroValuePolicy::Exclude).await;

    // Then: A is unchanged, B has no defined ratio but keeps its frequency
    assert_eq!(features.len(), 2);
    assert_close(features[0].return_ratio.unwrap(), 0.05);
    assert_eq!(features[1].customer_id, 200);
    assert_eq!(features[1].return_ratio, None);
    assert_close(features[1].frequency, 1.0);
}

#[tokio::test]
async fn test_excluded_zero_value_order_leaves_other_orders_averaged() {
    init_test_logging();

    // Given: one zero-value order and one half-returned order
    let engine = test_engine();
    RawData {
        orders: vec![
            OrderRow::new(1, 1, date(2023, 1, 1)),
            OrderRow::new(2, 1, date(2023, 2, 1)),
        ],
        lineitems: vec![LineItemRow::new(1, 1, 1, 0), LineItemRow::new(2, 1, 2, 500)],
        returns: vec![OrderReturnRow::new(2, 1, 1)],
    }
    .register(&engine, Environment::Training);

    // When
    let as_zero = feature_records(&engine, Environment::Training, ZeroValuePolicy::AsZero).await;
    let excluded = feature_records(&engine, Environment::Training, ZeroValuePolicy::Exclude).await;

    // Then
    assert_close(as_zero[0].return_ratio.unwrap(), 0.25);
    assert_close(excluded[0].return_ratio.unwrap(), 0.5);
    assert_close(excluded[0].frequency, 2.0);
}

#[tokio::test]
async fn test_customers_missing_from_orders_never_get_features() {
    init_test_logging();

    // Given: line items and returns for order 9, which has no ORDERS row
    let engine = test_engine();
    RawData {
        orders: vec![OrderRow::new(1, 1, date(2023, 1, 1))],
        lineitems: vec![LineItemRow::new(1, 1, 1, 100), LineItemRow::new(9, 1, 1, 100)],
        returns: vec![OrderReturnRow::new(9, 1, 1)],
    }
    .register(&engine, Environment::Training);

    // When
    let features = feature_records(&engine, Environment::Training, ZeroValuePolicy::AsZero).await;

    // Then
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].customer_id, 1);
    assert_close(features[0].return_ratio.unwrap(), 0.0);
}

#[tokio::test]
async fn test_repeated_runs_produce_identical_features() {
    init_test_logging();

    // Given
    let engine = test_engine();
    common::segmentable_scenario().register(&engine, Environment::Training);

    // When
    let first = feature_records(&engine, Environment::Training, ZeroValuePolicy::AsZero).await;
    let second = feature_records(&engine, Environment::Training, ZeroValuePolicy::AsZero).await;

    // Then: bit-identical, sorted by customer
    assert_eq!(first.len(), 8);
    assert_eq!(first, second);
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(
            a.return_ratio.map(f64::to_bits),
            b.return_ratio.map(f64::to_bits)
        );
        assert_eq!(a.frequency.to_bits(), b.frequency.to_bits());
    }
    assert!(first.windows(2).all(|w| w[0].customer_id < w[1].customer_id));
}
