//! Layout contract with the NFC-e consultation page.
//!
//! Every selector and label the extractor and parser depend on lives here.
//! When the source page changes its markup, this table is the only thing that
//! should need an edit.

/// Element that only appears once the page finished rendering.
pub const READY_MARKER: &str = ".ui-page";

/// Banner the source site shows instead of the receipt when it refuses a key.
pub const ERROR_BANNER: &str = ".avisoErro";

/// Label in front of the amount inside the total row.
pub const TOTAL_AMOUNT_LABEL: &str = "Valor a pagar R$:";

/// Named text regions read off a rendered receipt page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    Merchant,
    Identity,
    Totals,
    TotalRow,
    AccessKey,
    EmissionInfo,
    ItemName,
    ItemCode,
    ItemQuantity,
    ItemUnit,
    ItemUnitPrice,
}

/// Whether a region resolves to the first match or to every match in
/// document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Single,
    Sequence,
}

#[derive(Debug, Clone, Copy)]
pub struct RegionRule {
    pub region: Region,
    pub selector: &'static str,
    pub shape: Shape,
}

pub const REGIONS: &[RegionRule] = &[
    RegionRule { region: Region::Merchant, selector: ".txtTopo", shape: Shape::Sequence },
    RegionRule { region: Region::Identity, selector: ".text", shape: Shape::Sequence },
    RegionRule { region: Region::Totals, selector: ".totalNumb", shape: Shape::Sequence },
    RegionRule { region: Region::TotalRow, selector: ".linhaShade", shape: Shape::Sequence },
    RegionRule { region: Region::AccessKey, selector: ".chave", shape: Shape::Sequence },
    RegionRule {
        region: Region::EmissionInfo,
        selector: "#infos > div:nth-child(1) > div > ul > li",
        shape: Shape::Single,
    },
    RegionRule { region: Region::ItemName, selector: ".txtTit", shape: Shape::Sequence },
    RegionRule { region: Region::ItemCode, selector: ".RCod", shape: Shape::Sequence },
    RegionRule { region: Region::ItemQuantity, selector: ".Rqtd", shape: Shape::Sequence },
    RegionRule { region: Region::ItemUnit, selector: ".RUN", shape: Shape::Sequence },
    RegionRule { region: Region::ItemUnitPrice, selector: ".RvlUnit", shape: Shape::Sequence },
];

/// Line-item columns recovered by stripping a label from each raw entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemField {
    Code,
    Quantity,
    Unit,
    UnitPrice,
}

impl ItemField {
    pub fn region(&self) -> Region {
        match self {
            ItemField::Code => Region::ItemCode,
            ItemField::Quantity => Region::ItemQuantity,
            ItemField::Unit => Region::ItemUnit,
            ItemField::UnitPrice => Region::ItemUnitPrice,
        }
    }

    /// Text preceding the value inside each entry.
    pub fn label(&self) -> &'static str {
        match self {
            ItemField::Code => "(Código:",
            ItemField::Quantity => "Qtde.:",
            ItemField::Unit => "UN:",
            ItemField::UnitPrice => "Vl. Unit.:",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemField::Code => "code",
            ItemField::Quantity => "quantity",
            ItemField::Unit => "unit",
            ItemField::UnitPrice => "unit_price",
        }
    }
}

impl Region {
    pub fn rule(&self) -> &'static RegionRule {
        REGIONS
            .iter()
            .find(|r| r.region == *self)
            .unwrap_or_else(|| unreachable!("every region has a rule"))
    }

    pub fn selector(&self) -> &'static str {
        self.rule().selector
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Merchant => "merchant",
            Region::Identity => "identity",
            Region::Totals => "totals",
            Region::TotalRow => "total_row",
            Region::AccessKey => "access_key",
            Region::EmissionInfo => "emission_info",
            Region::ItemName => "item_name",
            Region::ItemCode => "item_code",
            Region::ItemQuantity => "item_quantity",
            Region::ItemUnit => "item_unit",
            Region::ItemUnitPrice => "item_unit_price",
        }
    }
}
