//! Integration tests: sampling scalar and vector fields built from memory.

use std::collections::BTreeMap;

use fieldset::{
    Dimensions, ErrorKind, Field, FieldDimensions, FieldError, FieldOptions, FieldSet, Grid,
    InterpMethod, LocateOptions, Mesh, NdArray, PerField, TimeConverter, VectorField,
};
use test_utils::{assert_approx_eq, fieldset_data, linspace, time_steps};

fn flat() -> FieldOptions {
    FieldOptions {
        mesh: Some(Mesh::Flat),
        ..Default::default()
    }
}

#[test]
fn test_linear_reproduces_every_node() {
    let data = fieldset_data(7, 5);
    let [ny, nx] = data.shape();
    let field = Field::from_data(
        "P",
        NdArray::new(vec![ny, nx], data.p.clone()).unwrap(),
        Dimensions::new(data.lon.clone(), data.lat.clone()),
        &FieldOptions {
            cast_data_dtype: Some(fieldset::Dtype::Float64),
            ..flat()
        },
    )
    .unwrap();

    for (y, &lat) in data.lat.iter().enumerate() {
        for (x, &lon) in data.lon.iter().enumerate() {
            let value = field.sample(0.0, 0.0, lat, lon).unwrap();
            assert_eq!(value, data.p[y * nx + x], "node ({y}, {x})");
        }
    }
}

#[test]
fn test_locate_tie_break_on_nodes() {
    let lon = linspace(0.0, 4.0, 5);
    let grid = Grid::new(
        NdArray::from_vec(lon.clone()),
        NdArray::from_vec(vec![0.0, 1.0]),
        None,
        None,
        TimeConverter::numeric(),
        Mesh::Flat,
    )
    .unwrap();
    let options = LocateOptions::default();

    for (i, &x) in lon.iter().enumerate().take(lon.len() - 1) {
        let loc = grid.locate(0.0, 0.0, 0.5, x, &options).unwrap();
        assert_eq!(loc.xi, i);
        assert_eq!(loc.xsi, 0.0);
    }

    let last = grid.locate(0.0, 0.0, 0.5, 4.0, &options).unwrap();
    assert_eq!(last.xi, lon.len() - 2);
    assert_eq!(last.xsi, 1.0);
}

#[test]
fn test_out_of_bounds_is_classified() {
    let field = Field::from_data(
        "P",
        NdArray::filled(vec![2, 2], 1.0),
        Dimensions::new(vec![0.0, 1.0], vec![0.0, 1.0]),
        &flat(),
    )
    .unwrap();
    let err = field.sample(0.0, 0.0, 0.5, 1.5).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfBounds);
}

#[test]
fn test_uv_and_swapped_components() {
    let dims = Dimensions::new(vec![0.0, 1.0], vec![0.0, 1.0]);
    let data = BTreeMap::from([
        ("U".to_string(), NdArray::filled(vec![2, 2], 1.0)),
        ("V".to_string(), NdArray::filled(vec![2, 2], 0.0)),
    ]);
    let mut set = FieldSet::from_data(data, FieldDimensions::Shared(dims), &flat()).unwrap();
    set.check_complete().unwrap();

    let uv = set.get_vector_field("UV").unwrap();
    assert_eq!(uv.sample(0.0, 0.0, 0.5, 0.5).unwrap(), (1.0, 0.0, None));

    let u = set.get_field("U").unwrap().clone();
    let v = set.get_field("V").unwrap().clone();
    let vu = VectorField::new("VU", v, u, None).unwrap();
    assert_eq!(vu.sample(0.0, 0.0, 0.5, 0.5).unwrap(), (0.0, 1.0, None));
}

#[test]
fn test_periodic_time_wraps() {
    let period = 30.0;
    let field = Field::from_data(
        "P",
        NdArray::new(vec![3, 2, 2], time_steps(3, 2, 2, 1.0)).unwrap(),
        Dimensions::new(vec![0.0, 1.0], vec![0.0, 1.0]).with_time(vec![0.0, 10.0, 20.0]),
        &FieldOptions {
            time_periodic: Some(period),
            ..flat()
        },
    )
    .unwrap();

    for t in [0.5, 5.0, 12.5, 25.0] {
        let base = field.sample(t, 0.0, 0.5, 0.5).unwrap();
        let wrapped = field.sample(t + period, 0.0, 0.5, 0.5).unwrap();
        assert_approx_eq!(wrapped, base, 1e-12);
    }
    // Between the last slice and the first of the next period
    assert_approx_eq!(field.sample(25.0, 0.0, 0.5, 0.5).unwrap(), 1.0, 1e-12);
}

#[test]
fn test_time_extrapolation_rejected() {
    let field = Field::from_data(
        "P",
        NdArray::new(vec![2, 2, 2], time_steps(2, 2, 2, 1.0)).unwrap(),
        Dimensions::new(vec![0.0, 1.0], vec![0.0, 1.0]).with_time(vec![0.0, 10.0]),
        &flat(),
    )
    .unwrap();
    let err = field.sample(11.0, 0.0, 0.5, 0.5).unwrap_err();
    assert!(matches!(err, FieldError::TimeExtrapolation { .. }));
    assert_eq!(err.kind(), ErrorKind::TimeExtrapolation);
}

#[test]
fn test_cgrid_on_single_cell_fails_at_completion() {
    let options = FieldOptions {
        interp_method: Some(PerField::All(InterpMethod::CgridVelocity)),
        ..flat()
    };
    let data = BTreeMap::from([
        ("U".to_string(), NdArray::filled(vec![1, 1], 1.0)),
        ("V".to_string(), NdArray::filled(vec![1, 1], 1.0)),
    ]);
    let dims = Dimensions::new(vec![0.0], vec![0.0]);
    let mut set = FieldSet::from_data(data, FieldDimensions::Shared(dims), &options).unwrap();

    let err = set.check_complete().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedTopology);
}

#[test]
fn test_empty_indices_rejected() {
    let options = FieldOptions {
        indices: Some(BTreeMap::from([("lon".to_string(), Vec::new())])),
        ..flat()
    };
    let err = Field::from_data(
        "P",
        NdArray::filled(vec![2, 2], 1.0),
        Dimensions::new(vec![0.0, 1.0], vec![0.0, 1.0]),
        &options,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_unknown_keyword_rejected() {
    let err = FieldOptions::from_json(&serde_json::json!({
        "mesh": "flat",
        "interp_methd": "linear",
    }))
    .unwrap_err();
    assert!(matches!(err, FieldError::UnknownKeyword(_)));

    let err = FieldOptions::from_yaml("mesh: flat\nchunk_size: auto\n").unwrap_err();
    assert!(matches!(err, FieldError::UnknownKeyword(_)));
}

#[test]
fn test_unknown_dimension_key_rejected() {
    let coords = BTreeMap::from([
        ("lon".to_string(), NdArray::from_vec(vec![0.0, 1.0])),
        ("lat".to_string(), NdArray::from_vec(vec![0.0, 1.0])),
        ("test".to_string(), NdArray::from_vec(vec![0.0])),
    ]);
    let err = Dimensions::from_map(coords).unwrap_err();
    assert!(matches!(err, FieldError::DimensionName { .. }));
}

#[test]
fn test_spherical_velocity_in_degrees_per_second() {
    let lat = linspace(-10.0, 10.0, 3);
    let lon = linspace(0.0, 20.0, 3);
    let field = Field::from_data(
        "V",
        NdArray::filled(vec![3, 3], 1852.0 * 60.0),
        Dimensions::new(lon, lat),
        &FieldOptions {
            cast_data_dtype: Some(fieldset::Dtype::Float64),
            ..Default::default()
        },
    )
    .unwrap();
    assert_approx_eq!(field.sample(0.0, 0.0, 0.0, 10.0).unwrap(), 1.0, 1e-12);
}

#[test]
fn test_curvilinear_field_continuous_across_antimeridian() {
    let row = [170.0, 180.0, -170.0, -160.0];
    let lon = NdArray::from_fn(vec![3, 4], |i| row[i[1]]);
    let lat = NdArray::from_fn(vec![3, 4], |i| -1.0 + i[0] as f64);
    // value grows with unwrapped longitude: 170, 180, 190, 200
    let data = NdArray::from_fn(vec![3, 4], |i| 170.0 + 10.0 * i[1] as f64);
    let field = Field::from_data(
        "P",
        data,
        Dimensions::curvilinear(lon, lat),
        &FieldOptions {
            mesh: Some(Mesh::Spherical),
            cast_data_dtype: Some(fieldset::Dtype::Float64),
            ..Default::default()
        },
    )
    .unwrap();

    for (x, expected, xi) in [(175.0, 175.0, 0), (-175.0, 185.0, 1), (-165.0, 195.0, 2)] {
        let loc = field.locate(0.0, 0.0, 0.25, x, None).unwrap();
        assert_eq!(loc.xi, xi, "cell of lon {x}");
        assert_approx_eq!(field.sample(0.0, 0.0, 0.25, x).unwrap(), expected, 1e-9);
    }

    let east = field.sample(0.0, 0.0, 0.25, 179.999).unwrap();
    let west = field.sample(0.0, 0.0, 0.25, -179.999).unwrap();
    assert_approx_eq!(west - east, 0.002, 1e-6);
}
