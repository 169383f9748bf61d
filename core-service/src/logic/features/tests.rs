//! Integration Tests for the feature contract
//!
//! Builder behaviour against the shipped contracts.

#[cfg(test)]
mod integration_tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use crate::logic::features::{
        build, presets, BuildError, DefaultsTable, FallbackPolicy, FeatureBuilder,
        FeatureSpec, HistorySource, ObservationRequest,
    };

    fn saturday_afternoon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 6)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap()
    }

    fn basic_request() -> ObservationRequest {
        ObservationRequest::new()
            .with("Temperature", 25.0)
            .with("Humidity", 60.0)
            .with("Wind_Speed_kmh", 10.0)
            .with("Visibility", 8.0)
            .with("Pressure", 1012.0)
            .with("so2", 5.0)
            .with("no2", 20.0)
            .with("Rainfall", 0.0)
            .with("PM10", 40.0)
            .with("AQI", 75.0)
    }

    fn temporal_defaults() -> DefaultsTable {
        let mut defaults = DefaultsTable::new();
        defaults.insert("SO2_ppb", 10.0);
        defaults.insert("CO_ppm", 5.02);
        defaults.insert("O3_ppb", 30.0);
        defaults.insert("PM25", 15.0);
        defaults
    }

    fn temporal_request() -> ObservationRequest {
        ObservationRequest::new()
            .with("AQI", 80.0)
            .with("PM10_µgm3", 42.0)
            .with("NO2_ppb", 18.0)
            .with("Temperature_C", 21.5)
            .with("Humidity_", 55.0)
            .with("Wind_Speed_ms", 3.2)
    }

    /// End-to-end example of the basic contract
    #[test]
    fn test_basic_contract_end_to_end() {
        let spec = presets::basic_v1().unwrap();
        let vector = build(&basic_request(), &spec, &DefaultsTable::new(), &saturday_afternoon())
            .expect("complete request must build");

        assert_eq!(
            vector.values,
            vec![25.0, 60.0, 10.0, 8.0, 1012.0, 5.0, 20.0, 0.0, 40.0, 75.0]
        );
        assert_eq!(vector.layout_hash, spec.layout_hash());
    }

    #[test]
    fn test_positional_correctness() {
        let spec = presets::temporal_v2().unwrap();
        let request = temporal_request();
        let vector = build(&request, &spec, &temporal_defaults(), &saturday_afternoon()).unwrap();

        assert_eq!(vector.len(), spec.feature_count());
        assert_eq!(vector.get_by_name(&spec, "AQI"), Some(80.0));
        assert_eq!(vector.get_by_name(&spec, "Wind_Speed_ms"), Some(3.2));
        assert_eq!(vector.get_by_name(&spec, "hour"), Some(14.0));
        assert_eq!(vector.get_by_name(&spec, "month"), Some(1.0));
        assert_eq!(vector.get_by_name(&spec, "day"), Some(6.0));
        assert_eq!(vector.get_by_name(&spec, "dayofweek"), Some(5.0));
        assert_eq!(vector.get_by_name(&spec, "is_weekend"), Some(1.0));
        assert_eq!(vector.get_by_name(&spec, "CO_ppm"), Some(5.02));
        assert_eq!(vector.get_by_name(&spec, "pm25_rolling_mean3"), Some(15.0));

        for (i, name) in spec.feature_order().iter().enumerate() {
            assert_eq!(vector.get(i), vector.get_by_name(&spec, name));
        }
    }

    #[test]
    fn test_missing_features_are_all_listed() {
        let spec = presets::basic_v1().unwrap();
        let request = ObservationRequest::new()
            .with("Temperature", 25.0)
            .with("Pressure", 1012.0)
            .with("AQI", 75.0);

        let err = build(&request, &spec, &DefaultsTable::new(), &saturday_afternoon()).unwrap_err();
        assert_eq!(
            err,
            BuildError::MissingFeature(vec![
                "Humidity".into(),
                "WindSpeedkmh".into(),
                "Visibility".into(),
                "so2".into(),
                "no2".into(),
                "Rainfall".into(),
                "PM10".into(),
            ])
        );
    }

    #[test]
    fn test_derived_values_are_deterministic() {
        let spec = presets::temporal_v2().unwrap();
        let defaults = temporal_defaults();
        let now = saturday_afternoon();

        let a = build(&temporal_request(), &spec, &defaults, &now).unwrap();
        let b = build(&temporal_request(), &spec, &defaults, &now).unwrap();
        assert_eq!(a, b);

        let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let c = build(&temporal_request(), &spec, &defaults, &monday).unwrap();
        assert_eq!(c.get_by_name(&spec, "dayofweek"), Some(0.0));
        assert_eq!(c.get_by_name(&spec, "is_weekend"), Some(0.0));
    }

    #[test]
    fn test_defaulted_value_ignores_request() {
        let spec = presets::temporal_v2().unwrap();
        let defaults = temporal_defaults();

        let mut request = temporal_request();
        request.insert("PM25_1hr_ago", 99.0);
        request.insert("SO2_ppb", 1.0);

        let vector = build(&request, &spec, &defaults, &saturday_afternoon()).unwrap();
        assert_eq!(vector.get_by_name(&spec, "PM25_1hr_ago"), Some(15.0));
        assert_eq!(vector.get_by_name(&spec, "SO2_ppb"), Some(10.0));
    }

    #[test]
    fn test_prefer_supplied_policy() {
        let spec = presets::temporal_v2().unwrap();
        let defaults = temporal_defaults();

        let mut request = temporal_request();
        request.insert("PM25_1hr_ago", 33.0);

        let vector = FeatureBuilder::new(&spec, &defaults)
            .with_policy(FallbackPolicy::PreferSupplied)
            .build(&request, &saturday_afternoon())
            .unwrap();
        assert_eq!(vector.get_by_name(&spec, "PM25_1hr_ago"), Some(33.0));
        assert_eq!(vector.get_by_name(&spec, "PM25_2hr_ago"), Some(15.0));
    }

    #[test]
    fn test_missing_default() {
        let spec = presets::temporal_v2().unwrap();
        let mut defaults = DefaultsTable::new();
        defaults.insert("SO2_ppb", 10.0);

        let err = build(&temporal_request(), &spec, &defaults, &saturday_afternoon()).unwrap_err();
        assert_eq!(
            err,
            BuildError::MissingDefault(vec!["CO_ppm".into(), "O3_ppb".into(), "PM25".into()])
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        let spec = presets::basic_v1().unwrap();
        let defaults = DefaultsTable::new();

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let request = basic_request().with("Humidity", bad);
            let err = build(&request, &spec, &defaults, &saturday_afternoon()).unwrap_err();
            assert_eq!(err, BuildError::TypeMismatch(vec!["Humidity".into()]));
        }

        let mut request = basic_request();
        request.insert_raw("PM10", serde_json::json!("forty"));
        let err = build(&request, &spec, &defaults, &saturday_afternoon()).unwrap_err();
        assert_eq!(err, BuildError::TypeMismatch(vec!["PM10".into()]));
    }

    #[test]
    fn test_duplicate_field_after_rename() {
        let spec = presets::basic_v1().unwrap();
        let defaults = DefaultsTable::new();

        let conflicting = basic_request().with("WindSpeedkmh", 12.0);
        let err = build(&conflicting, &spec, &defaults, &saturday_afternoon()).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateField { ref feature, .. } if feature == "WindSpeedkmh"));

        let agreeing = basic_request().with("WindSpeedkmh", 10.0);
        assert!(build(&agreeing, &spec, &defaults, &saturday_afternoon()).is_ok());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let spec = presets::basic_v1().unwrap();
        let request = basic_request().with("Station", 7.0);
        let vector = build(&request, &spec, &DefaultsTable::new(), &saturday_afternoon()).unwrap();
        assert_eq!(vector.len(), 10);
    }

    #[test]
    fn test_non_numeric_extra_fields_are_ignored() {
        let spec = presets::basic_v1().unwrap();
        let mut request = basic_request();
        request.insert_raw("City", serde_json::json!("Delhi"));
        request.insert_raw("station_id", serde_json::Value::Null);
        let vector = build(&request, &spec, &DefaultsTable::new(), &saturday_afternoon()).unwrap();
        assert_eq!(vector.len(), 10);

        // Defaulted fields are only read under PreferSupplied
        let spec = presets::temporal_v2().unwrap();
        let mut request = temporal_request();
        request.insert_raw("PM25_1hr_ago", serde_json::json!("n/a"));
        assert!(build(&request, &spec, &temporal_defaults(), &saturday_afternoon()).is_ok());
        let err = FeatureBuilder::new(&spec, &temporal_defaults())
            .with_policy(FallbackPolicy::PreferSupplied)
            .build(&request, &saturday_afternoon())
            .unwrap_err();
        assert_eq!(err, BuildError::TypeMismatch(vec!["PM25_1hr_ago".into()]));
    }

    #[test]
    fn test_defaulted_value_is_exact() {
        let spec = FeatureSpec::builder("only-default")
            .supplied("x")
            .defaulted("lagged", "K", HistorySource::lag("y", 1))
            .build()
            .unwrap();
        let mut defaults = DefaultsTable::new();
        defaults.insert("K", 0.1 + 0.2);

        for x in [-1.0, 0.0, 1e9] {
            let request = ObservationRequest::new().with("x", x).with("lagged", 5.0);
            let vector = build(&request, &spec, &defaults, &saturday_afternoon()).unwrap();
            assert_eq!(vector.values[1].to_bits(), (0.1f64 + 0.2).to_bits());
        }
    }
}
