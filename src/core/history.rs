//! Annual market history (1928 onward) and the IRS uniform lifetime table.
//!
//! Returns are real (inflation-adjusted) annual returns from the NYU Stern dataset;
//! yields are December dividend and 10-year Treasury yields from Shiller's data.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalYear {
    pub year: i32,
    pub stocks: f64,
    pub bonds: f64,
    pub cash: f64,
    pub inflation: f64,
    pub stock_yield: f64,
    pub bond_yield: f64,
}

const fn row(
    year: i32,
    stocks: f64,
    bonds: f64,
    cash: f64,
    inflation: f64,
    stock_yield: f64,
    bond_yield: f64,
) -> HistoricalYear {
    HistoricalYear {
        year,
        stocks,
        bonds,
        cash,
        inflation,
        stock_yield,
        bond_yield,
    }
}

pub static HISTORICAL_YEARS: [HistoricalYear; 97] = [
    row(1928, 0.4549, 0.0201, 0.0429, -0.0116, 0.0367, 0.0358),
    row(1929, -0.0883, 0.036, 0.0256, 0.0058, 0.0453, 0.0332),
    row(1930, -0.2001, 0.1168, 0.1169, -0.064, 0.0632, 0.0334),
    row(1931, -0.3807, 0.0745, 0.1282, -0.0932, 0.0972, 0.0365),
    row(1932, 0.0182, 0.2125, 0.1264, -0.1027, 0.0733, 0.0334),
    row(1933, 0.4885, 0.0108, 0.002, 0.0076, 0.0441, 0.0314),
    row(1934, -0.0266, 0.0635, -0.0122, 0.0152, 0.0486, 0.0282),
    row(1935, 0.4249, 0.0144, -0.0274, 0.0299, 0.036, 0.0266),
    row(1936, 0.3006, 0.0352, -0.0126, 0.0145, 0.0422, 0.0268),
    row(1937, -0.3713, -0.0144, -0.0251, 0.0286, 0.0726, 0.0257),
    row(1938, 0.3298, 0.0719, 0.0292, -0.0278, 0.0402, 0.0238),
    row(1939, -0.011, 0.0441, 0.0005, 0.0, 0.0501, 0.0222),
    row(1940, -0.1131, 0.0465, -0.0067, 0.0071, 0.0636, 0.0197),
    row(1941, -0.2065, -0.1087, -0.0891, 0.0993, 0.0811, 0.0242),
    row(1942, 0.093, -0.0618, -0.0797, 0.0903, 0.062, 0.0247),
    row(1943, 0.2147, -0.0046, -0.025, 0.0296, 0.0531, 0.0248),
    row(1944, 0.1636, 0.0027, -0.0188, 0.023, 0.0489, 0.0238),
    row(1945, 0.3284, 0.0152, -0.0183, 0.0225, 0.0381, 0.0221),
    row(1946, -0.2248, -0.127, -0.1503, 0.1813, 0.0469, 0.0225),
    row(1947, -0.0334, -0.0727, -0.0757, 0.0884, 0.0559, 0.0242),
    row(1948, 0.0263, -0.0101, -0.0189, 0.0299, 0.0612, 0.0232),
    row(1949, 0.2081, 0.0688, 0.0326, -0.0207, 0.0689, 0.0232),
    row(1950, 0.2348, -0.0519, -0.0446, 0.0593, 0.0744, 0.0255),
    row(1951, 0.1668, -0.0594, -0.0423, 0.06, 0.0602, 0.0267),
    row(1952, 0.1727, 0.015, 0.0096, 0.0075, 0.0541, 0.0282),
    row(1953, -0.0194, 0.0337, 0.0113, 0.0075, 0.0584, 0.0259),
    row(1954, 0.5371, 0.0406, 0.0169, -0.0074, 0.044, 0.0251),
    row(1955, 0.321, -0.017, 0.0134, 0.0037, 0.0361, 0.0296),
    row(1956, 0.0433, -0.0509, -0.0035, 0.0299, 0.0375, 0.0359),
    row(1957, -0.1298, 0.0379, 0.0032, 0.029, 0.0444, 0.0321),
    row(1958, 0.4123, -0.0379, 0.0001, 0.0176, 0.0327, 0.0386),
    row(1959, 0.1015, -0.043, 0.0163, 0.0173, 0.031, 0.0469),
    row(1960, -0.0101, 0.1014, 0.0149, 0.0136, 0.0343, 0.0384),
    row(1961, 0.2579, 0.0138, 0.0167, 0.0067, 0.0282, 0.0406),
    row(1962, -0.1001, 0.043, 0.0142, 0.0133, 0.034, 0.0386),
    row(1963, 0.2063, 0.0004, 0.0149, 0.0164, 0.0307, 0.0413),
    row(1964, 0.153, 0.0273, 0.0255, 0.0097, 0.0298, 0.0418),
    row(1965, 0.1028, -0.0118, 0.0199, 0.0192, 0.0297, 0.0462),
    row(1966, -0.1298, -0.0053, 0.0135, 0.0346, 0.0353, 0.0484),
    row(1967, 0.2015, -0.0448, 0.0122, 0.0304, 0.0306, 0.057),
    row(1968, 0.0582, -0.0138, 0.0059, 0.0472, 0.0288, 0.0603),
    row(1969, -0.136, -0.1056, 0.0044, 0.062, 0.0347, 0.0765),
    row(1970, -0.019, 0.1059, 0.0078, 0.0557, 0.0349, 0.0639),
    row(1971, 0.1061, 0.0631, 0.0103, 0.0327, 0.031, 0.0593),
    row(1972, 0.1484, -0.0057, 0.0063, 0.0341, 0.0268, 0.0636),
    row(1973, -0.2117, -0.0464, -0.0154, 0.0871, 0.0357, 0.0674),
    row(1974, -0.3404, -0.0921, -0.04, 0.1234, 0.0537, 0.0743),
    row(1975, 0.2811, -0.0312, -0.0108, 0.0694, 0.0415, 0.08),
    row(1976, 0.1809, 0.106, 0.0011, 0.0486, 0.0387, 0.0687),
    row(1977, -0.1282, -0.0507, -0.0135, 0.067, 0.0498, 0.0769),
    row(1978, -0.023, -0.0899, -0.0169, 0.0902, 0.0528, 0.0901),
    row(1979, 0.0461, -0.1114, -0.0286, 0.1329, 0.0524, 0.1039),
    row(1980, 0.1708, -0.1378, -0.01, 0.1252, 0.0461, 0.1284),
    row(1981, -0.1251, -0.0066, 0.0469, 0.0892, 0.0536, 0.1372),
    row(1982, 0.1598, 0.2792, 0.0652, 0.0383, 0.0493, 0.1054),
    row(1983, 0.1787, -0.0057, 0.0465, 0.0379, 0.0431, 0.1183),
    row(1984, 0.0211, 0.0941, 0.0538, 0.0395, 0.0458, 0.115),
    row(1985, 0.2643, 0.2111, 0.0354, 0.038, 0.0381, 0.0926),
    row(1986, 0.1721, 0.2293, 0.0482, 0.011, 0.0333, 0.0711),
    row(1987, 0.0132, -0.09, 0.0129, 0.0443, 0.0366, 0.0899),
    row(1988, 0.116, 0.0364, 0.0215, 0.0442, 0.0353, 0.0911),
    row(1989, 0.2564, 0.1247, 0.0331, 0.0465, 0.0317, 0.0784),
    row(1990, -0.0864, 0.0012, 0.0131, 0.0611, 0.0368, 0.0808),
    row(1991, 0.2636, 0.1159, 0.0224, 0.0306, 0.0314, 0.0709),
    row(1992, 0.0446, 0.0628, 0.0052, 0.029, 0.0284, 0.0677),
    row(1993, 0.0703, 0.1116, 0.0024, 0.0275, 0.027, 0.0577),
    row(1994, -0.0131, -0.1043, 0.0154, 0.0267, 0.0289, 0.0781),
    row(1995, 0.338, 0.2042, 0.0288, 0.0254, 0.0224, 0.0571),
    row(1996, 0.1874, -0.0183, 0.0163, 0.0332, 0.02, 0.063),
    row(1997, 0.3088, 0.081, 0.033, 0.017, 0.0161, 0.0581),
    row(1998, 0.263, 0.131, 0.0311, 0.0161, 0.0136, 0.0465),
    row(1999, 0.1772, -0.1065, 0.019, 0.0268, 0.0117, 0.0628),
    row(2000, -0.1201, 0.1283, 0.0235, 0.0339, 0.0122, 0.0524),
    row(2001, -0.132, 0.0396, 0.0182, 0.0155, 0.0137, 0.0509),
    row(2002, -0.2378, 0.1244, -0.0075, 0.0238, 0.0179, 0.0403),
    row(2003, 0.2599, -0.0148, -0.0086, 0.0188, 0.0161, 0.0427),
    row(2004, 0.0725, 0.012, -0.0182, 0.0326, 0.0162, 0.0423),
    row(2005, 0.0137, -0.0053, -0.0026, 0.0342, 0.0176, 0.0447),
    row(2006, 0.1275, -0.0057, 0.0214, 0.0254, 0.0176, 0.0456),
    row(2007, 0.0135, 0.0589, 0.0027, 0.0408, 0.0187, 0.041),
    row(2008, -0.3661, 0.1999, 0.0128, 0.0009, 0.0324, 0.0242),
    row(2009, 0.226, -0.1347, -0.025, 0.0272, 0.0202, 0.0359),
    row(2010, 0.1313, 0.0686, -0.0134, 0.015, 0.0183, 0.0329),
    row(2011, -0.0084, 0.127, -0.0283, 0.0296, 0.0213, 0.0198),
    row(2012, 0.1391, 0.0121, -0.0163, 0.0174, 0.022, 0.0172),
    row(2013, 0.3019, -0.1045, -0.0142, 0.015, 0.0194, 0.029),
    row(2014, 0.1267, 0.0991, -0.0072, 0.0076, 0.0192, 0.0221),
    row(2015, 0.0064, 0.0055, -0.0067, 0.0073, 0.0211, 0.0224),
    row(2016, 0.095, -0.0136, -0.0172, 0.0207, 0.0203, 0.0249),
    row(2017, 0.1909, 0.0068, -0.0115, 0.0211, 0.0184, 0.024),
    row(2018, -0.0602, -0.0189, 0.0003, 0.0191, 0.0209, 0.0283),
    row(2019, 0.2828, 0.0719, -0.0022, 0.0229, 0.0183, 0.0186),
    row(2020, 0.1644, 0.0984, -0.0099, 0.0136, 0.0158, 0.0093),
    row(2021, 0.2002, -0.107, -0.0653, 0.0704, 0.0129, 0.0147),
    row(2022, -0.2301, -0.2281, -0.0416, 0.0645, 0.0171, 0.0362),
    row(2023, 0.2197, 0.0051, 0.0166, 0.0335, 0.015, 0.0402),
    row(2024, 0.2154, -0.0427, 0.0216, 0.0275, 0.0124, 0.0439),
];

pub const RMD_TABLE_FIRST_AGE: u32 = 72;
pub const RMD_TABLE_LAST_AGE: u32 = 120;

static UNIFORM_LIFETIME_FACTORS: [f64; 49] = [
    27.4, // 72
    26.5, // 73
    25.5, // 74
    24.6, // 75
    23.7, // 76
    22.9, // 77
    22.0, // 78
    21.1, // 79
    20.2, // 80
    19.4, // 81
    18.5, // 82
    17.7, // 83
    16.8, // 84
    16.0, // 85
    15.2, // 86
    14.4, // 87
    13.7, // 88
    12.9, // 89
    12.2, // 90
    11.5, // 91
    10.8, // 92
    10.1, // 93
    9.5, // 94
    8.9, // 95
    8.4, // 96
    7.8, // 97
    7.3, // 98
    6.8, // 99
    6.4, // 100
    6.0, // 101
    5.6, // 102
    5.2, // 103
    4.9, // 104
    4.6, // 105
    4.3, // 106
    4.1, // 107
    3.9, // 108
    3.7, // 109
    3.5, // 110
    3.4, // 111
    3.3, // 112
    3.1, // 113
    3.0, // 114
    2.9, // 115
    2.8, // 116
    2.7, // 117
    2.5, // 118
    2.3, // 119
    2.0, // 120
];

pub fn first_year() -> i32 {
    HISTORICAL_YEARS[0].year
}

pub fn last_year() -> i32 {
    HISTORICAL_YEARS[HISTORICAL_YEARS.len() - 1].year
}

pub fn year_count() -> usize {
    HISTORICAL_YEARS.len()
}

pub fn historical_year(year: i32) -> Option<&'static HistoricalYear> {
    let offset = year.checked_sub(first_year())?;
    if offset < 0 {
        return None;
    }
    HISTORICAL_YEARS.get(offset as usize)
}

/// Life-expectancy divisor for an RMD at `age`. Ages past the end of the
/// table reuse the last factor.
pub fn uniform_lifetime_factor(age: u32) -> Option<f64> {
    if age < RMD_TABLE_FIRST_AGE {
        return None;
    }
    let idx = (age.min(RMD_TABLE_LAST_AGE) - RMD_TABLE_FIRST_AGE) as usize;
    UNIFORM_LIFETIME_FACTORS.get(idx).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_contiguous_by_year() {
        for (idx, row) in HISTORICAL_YEARS.iter().enumerate() {
            assert_eq!(row.year, first_year() + idx as i32);
        }
        assert_eq!(first_year(), 1928);
        assert_eq!(last_year(), 2024);
    }

    #[test]
    fn historical_lookup_hits_exact_rows() {
        let row = historical_year(1929).expect("1929 present");
        assert_eq!(row.stocks, -0.0883);
        assert_eq!(row.bonds, 0.036);
        assert!(historical_year(1927).is_none());
        assert!(historical_year(2025).is_none());
    }

    #[test]
    fn lifetime_factors_cover_table_and_clamp() {
        assert_eq!(uniform_lifetime_factor(71), None);
        assert_eq!(uniform_lifetime_factor(72), Some(27.4));
        assert_eq!(uniform_lifetime_factor(75), Some(24.6));
        assert_eq!(uniform_lifetime_factor(120), Some(2.0));
        assert_eq!(uniform_lifetime_factor(130), Some(2.0));
    }
}
